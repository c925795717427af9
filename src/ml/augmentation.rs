//! 画像の読み込みとデータ拡張
//!
//! 学習画像ごとにランダムなアフィン変換（回転・せん断・ズーム・シフト）と
//! 水平反転を適用します。変換は画像中心まわりで行い、範囲外は最も近い端の画素で埋めます。

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::config::AugmentationSettings;

type Matrix3 = [[f32; 3]; 3];

/// 1枚の画像に適用する変換パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// 回転角（度）
    pub theta: f32,
    /// 縦方向シフト（画素）
    pub shift_rows: f32,
    /// 横方向シフト（画素）
    pub shift_cols: f32,
    /// せん断角（度）
    pub shear: f32,
    /// 縦方向ズーム
    pub zoom_rows: f32,
    /// 横方向ズーム
    pub zoom_cols: f32,
    /// 水平反転
    pub flip: bool,
}

impl AffineParams {
    /// 変換なし
    pub fn identity() -> Self {
        Self {
            theta: 0.0,
            shift_rows: 0.0,
            shift_cols: 0.0,
            shear: 0.0,
            zoom_rows: 1.0,
            zoom_cols: 1.0,
            flip: false,
        }
    }

    /// 設定範囲から一様にサンプリングする
    pub fn sample<R: Rng>(settings: &AugmentationSettings, height: u32, width: u32, rng: &mut R) -> Self {
        let theta = symmetric(rng, settings.rotation_range);
        let shift_rows = symmetric(rng, settings.height_shift_range) * height as f32;
        let shift_cols = symmetric(rng, settings.width_shift_range) * width as f32;
        let shear = symmetric(rng, settings.shear_range);

        let (zoom_rows, zoom_cols) = if settings.zoom_range > 0.0 {
            let low = 1.0 - settings.zoom_range;
            let high = 1.0 + settings.zoom_range;
            (rng.gen_range(low..high), rng.gen_range(low..high))
        } else {
            (1.0, 1.0)
        };

        let flip = settings.horizontal_flip && rng.gen_bool(0.5);

        Self {
            theta,
            shift_rows,
            shift_cols,
            shear,
            zoom_rows,
            zoom_cols,
            flip,
        }
    }

    /// 出力座標 (row, col, 1) から入力座標への変換行列
    ///
    /// 回転 x シフト x せん断 x ズーム を画像中心 (size / 2 + 0.5) まわりに適用します。
    pub fn transform_matrix(&self, height: u32, width: u32) -> Matrix3 {
        let theta = self.theta.to_radians();
        let shear = self.shear.to_radians();

        let rotation = [
            [theta.cos(), -theta.sin(), 0.0],
            [theta.sin(), theta.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let shift = [
            [1.0, 0.0, self.shift_rows],
            [0.0, 1.0, self.shift_cols],
            [0.0, 0.0, 1.0],
        ];
        let shear = [
            [1.0, -shear.sin(), 0.0],
            [0.0, shear.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let zoom = [
            [self.zoom_rows, 0.0, 0.0],
            [0.0, self.zoom_cols, 0.0],
            [0.0, 0.0, 1.0],
        ];

        let transform = matmul(&matmul(&matmul(&rotation, &shift), &shear), &zoom);

        let o_rows = height as f32 / 2.0 + 0.5;
        let o_cols = width as f32 / 2.0 + 0.5;
        let offset = [[1.0, 0.0, o_rows], [0.0, 1.0, o_cols], [0.0, 0.0, 1.0]];
        let reset = [[1.0, 0.0, -o_rows], [0.0, 1.0, -o_cols], [0.0, 0.0, 1.0]];

        matmul(&matmul(&offset, &transform), &reset)
    }

    fn is_identity_affine(&self) -> bool {
        self.theta == 0.0
            && self.shift_rows == 0.0
            && self.shift_cols == 0.0
            && self.shear == 0.0
            && self.zoom_rows == 1.0
            && self.zoom_cols == 1.0
    }
}

/// ランダムデータ拡張
///
/// バッチャーから共有されるため、乱数生成器は内部で排他制御します。
#[derive(Clone)]
pub struct Augmenter {
    settings: AugmentationSettings,
    rng: Arc<Mutex<StdRng>>,
}

impl Augmenter {
    pub fn new(settings: AugmentationSettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            settings,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn settings(&self) -> &AugmentationSettings {
        &self.settings
    }

    /// 次の画像用の変換パラメータを引く
    pub fn next_params(&self, height: u32, width: u32) -> AffineParams {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        AffineParams::sample(&self.settings, height, width, &mut *rng)
    }

    /// ランダム変換を適用した画像を返す
    pub fn augment(&self, img: &RgbImage) -> RgbImage {
        let params = self.next_params(img.height(), img.width());
        apply(img, &params)
    }
}

/// 変換パラメータを画像に適用する（アフィン変換の後に水平反転）
pub fn apply(img: &RgbImage, params: &AffineParams) -> RgbImage {
    let mut result = if params.is_identity_affine() {
        img.clone()
    } else {
        warp(img, &params.transform_matrix(img.height(), img.width()))
    };

    if params.flip {
        imageops::flip_horizontal_in_place(&mut result);
    }

    result
}

/// 出力画素ごとに入力座標を求めてバイリニア補間する
fn warp(img: &RgbImage, matrix: &Matrix3) -> RgbImage {
    let (width, height) = img.dimensions();
    let mut output = RgbImage::new(width, height);

    for row in 0..height {
        for col in 0..width {
            let r = row as f32;
            let c = col as f32;
            let src_row = matrix[0][0] * r + matrix[0][1] * c + matrix[0][2];
            let src_col = matrix[1][0] * r + matrix[1][1] * c + matrix[1][2];
            output.put_pixel(col, row, bilinear_sample(img, src_row, src_col));
        }
    }

    output
}

/// 範囲外は端の画素を延長してサンプリング
fn bilinear_sample(img: &RgbImage, row: f32, col: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let max_row = (height - 1) as f32;
    let max_col = (width - 1) as f32;

    let row = row.clamp(0.0, max_row);
    let col = col.clamp(0.0, max_col);

    let r0 = row.floor() as u32;
    let c0 = col.floor() as u32;
    let r1 = (r0 + 1).min(height - 1);
    let c1 = (c0 + 1).min(width - 1);

    let fr = row - r0 as f32;
    let fc = col - c0 as f32;

    let p00 = img.get_pixel(c0, r0);
    let p01 = img.get_pixel(c1, r0);
    let p10 = img.get_pixel(c0, r1);
    let p11 = img.get_pixel(c1, r1);

    let mut result = [0u8; 3];
    for ch in 0..3 {
        let v = p00[ch] as f32 * (1.0 - fr) * (1.0 - fc)
            + p01[ch] as f32 * (1.0 - fr) * fc
            + p10[ch] as f32 * fr * (1.0 - fc)
            + p11[ch] as f32 * fr * fc;
        result[ch] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}

fn matmul(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..range)
    } else {
        0.0
    }
}

/// 画像を読み込み、RGBに変換して指定サイズへ最近傍補間でリサイズ
pub fn load_image(path: &Path, size: u32) -> Result<RgbImage> {
    let img = image::open(path)
        .with_context(|| format!("Failed to open image: {:?}", path))?
        .to_rgb8();

    if img.width() == size && img.height() == size {
        Ok(img)
    } else {
        Ok(imageops::resize(&img, size, size, FilterType::Nearest))
    }
}

/// 中央の正方形領域を切り出す
pub fn center_crop(img: &RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    imageops::crop_imm(img, x, y, side, side).to_image()
}

/// [3, H, W] の平坦な画素列に変換し、係数を掛ける
pub fn to_chw(img: &RgbImage, scale: f32, is_bgr: bool) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * (width * height) as usize);

    let order: [usize; 3] = if is_bgr { [2, 1, 0] } else { [0, 1, 2] };
    for channel in order {
        for y in 0..height {
            for x in 0..width {
                let pixel = img.get_pixel(x, y);
                data.push(pixel[channel] as f32 * scale);
            }
        }
    }

    data
}
