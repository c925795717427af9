//! モデル推論機能

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use image::RgbImage;
use std::path::Path;

use crate::ml::augmentation::{center_crop, to_chw};
use crate::ml::ml_model::CoinClassifier;
use crate::model::{load_model_with_metadata, InferenceConfig};

/// 1枚の画像に対する予測
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// パッケージのラベル一覧におけるインデックス
    pub index: usize,
    pub label: String,
    pub confidence: f32,
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: CoinClassifier<B>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// 画像分類パッケージを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(package_path: P, device: &B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(package_path.as_ref())?;
        let config = InferenceConfig::from_metadata(&metadata);

        if metadata.model_config.num_classes != config.num_classes() {
            anyhow::bail!(
                "モデルの出力数 ({}) とラベル数 ({}) が一致しません",
                metadata.model_config.num_classes,
                config.num_classes()
            );
        }

        let model = metadata.model_config.init::<B>(device)?;

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        let model = model.load_record(record);

        Ok(Self {
            model,
            config,
            device: device.clone(),
        })
    }

    /// 読み込み済み画像を分類
    ///
    /// 中央の正方形を切り出し、モデルの入力サイズへリサイズしてから推論します。
    pub fn classify(&self, img: &RgbImage) -> Result<Prediction> {
        let size = self.config.image_size as u32;
        let square = center_crop(img);
        let resized = image::imageops::resize(&square, size, size, image::imageops::FilterType::Triangle);

        let image_data = to_chw(&resized, self.config.image_scale, self.config.is_bgr);
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device).reshape([
            1,
            3,
            self.config.image_size,
            self.config.image_size,
        ]);

        let probabilities: Vec<f32> = self
            .model
            .forward_probabilities(tensor)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        let (index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| anyhow::anyhow!("推論結果が空です"))?;

        let label = self
            .config
            .class_index_to_label(index)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", index))?
            .to_string();

        Ok(Prediction {
            index,
            label,
            confidence,
        })
    }

    /// 画像ファイルを分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let path = image_path.as_ref();
        let img = image::open(path)
            .map_err(|e| anyhow::anyhow!("画像の読み込みエラー ({}): {}", path.display(), e))?
            .to_rgb8();
        self.classify(&img)
    }

    /// 確信度が閾値を超えた場合のみ予測を返す
    pub fn classify_confident<P: AsRef<Path>>(&self, image_path: P) -> Result<Option<Prediction>> {
        let prediction = self.classify_image(image_path)?;
        Ok(self
            .config
            .is_confident(prediction.confidence)
            .then_some(prediction))
    }

    /// 複数画像をバッチ分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Prediction>> {
        let mut results = Vec::new();

        for path in image_paths {
            results.push(self.classify_image(path)?);
        }

        Ok(results)
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}
