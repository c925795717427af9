//! 学習済みモデルのエクスポート
//!
//! - 画像分類パッケージ: metadata.json + model.bin（f32）を tar.gz にまとめる
//! - 軽量モデル: チェックポイントを読み込み、半精度のレコードとして生のバイト列で書き出す

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, HalfPrecisionSettings, Recorder},
    tensor::backend::Backend,
};

use crate::ml::ml_model::{CoinClassifier, ModelConfig};
use crate::ml::training::load_checkpoint;
use crate::model::config::ExportSettings;
use crate::model::label_manifest::LabelManifest;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::{log_metadata_info, save_model_with_metadata};

/// モデル構造の設定ファイル名
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

/// 画像分類パッケージのパス
pub fn vision_package_path(run_dir: &Path, model_name: &str) -> PathBuf {
    run_dir.join(format!("{}.vision.tar.gz", model_name))
}

/// 軽量モデルのパス
pub fn lite_model_path(run_dir: &Path, model_name: &str) -> PathBuf {
    run_dir.join(format!("{}.lite.bin", model_name))
}

/// モデル構造の設定を保存
pub fn save_model_config(model_config: &ModelConfig, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(MODEL_CONFIG_FILE);
    model_config
        .save(&path)
        .with_context(|| format!("Failed to write model config: {:?}", path))?;
    Ok(path)
}

/// 画像分類パッケージを書き出す
///
/// ラベルはクラス対応表から辞書順で取得します。
pub fn export_vision_package<B: Backend>(
    model: &CoinClassifier<B>,
    model_config: &ModelConfig,
    manifest: &LabelManifest,
    settings: &ExportSettings,
    image_scale: f32,
    num_epochs: usize,
    run_dir: &Path,
) -> Result<PathBuf> {
    let class_labels = manifest.sorted_labels();
    if class_labels.len() != model.num_classes() {
        anyhow::bail!(
            "ラベル数 ({}) がモデルの出力数 ({}) と一致しません",
            class_labels.len(),
            model.num_classes()
        );
    }

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = recorder
        .record(model.clone().into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの変換エラー: {:?}", e))?;

    let metadata = ModelMetadata::new(
        settings.model_name.clone(),
        settings.input_name.clone(),
        settings.output_name.clone(),
        class_labels,
        image_scale,
        settings.is_bgr,
        model_config.clone(),
        num_epochs as u32,
    );

    let path = save_model_with_metadata(
        &vision_package_path(run_dir, &settings.model_name),
        &metadata,
        &model_binary,
    )?;

    tracing::info!("画像分類パッケージを保存しました: {}", path.display());
    log_metadata_info(&metadata);

    Ok(path)
}

/// 軽量モデルを書き出す
///
/// `source` のチェックポイントを読み込みます。`source` と同じディレクトリに
/// model_config.json があればその構造で、なければ `fallback_config` で復元します。
pub fn export_lite<B: Backend>(
    source: &Path,
    fallback_config: &ModelConfig,
    output_path: &Path,
    device: &B::Device,
) -> Result<PathBuf> {
    let model_config = source
        .parent()
        .map(|dir| dir.join(MODEL_CONFIG_FILE))
        .filter(|path| path.exists())
        .map(|path| {
            ModelConfig::load(&path)
                .map_err(|e| anyhow::anyhow!("モデル設定の読み込みエラー ({}): {:?}", path.display(), e))
        })
        .transpose()?
        .unwrap_or_else(|| fallback_config.clone());

    tracing::info!("軽量モデルの変換元: {}", source.display());

    let model = load_checkpoint(model_config.init::<B>(device)?, source, device)?;

    let recorder = BinBytesRecorder::<HalfPrecisionSettings>::default();
    let bytes = recorder
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("軽量モデルの変換エラー: {:?}", e))?;

    std::fs::write(output_path, &bytes)
        .with_context(|| format!("Failed to write lite model: {:?}", output_path))?;

    tracing::info!(
        "軽量モデルを保存しました: {} ({:.2} MB)",
        output_path.display(),
        bytes.len() as f64 / 1024.0 / 1024.0
    );

    Ok(output_path.to_path_buf())
}

/// 軽量モデルを読み込む
pub fn load_lite<B: Backend>(
    path: &Path,
    model_config: &ModelConfig,
    device: &B::Device,
) -> Result<CoinClassifier<B>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read lite model: {:?}", path))?;

    let recorder = BinBytesRecorder::<HalfPrecisionSettings>::default();
    let record = recorder
        .load(bytes, device)
        .map_err(|e| anyhow::anyhow!("軽量モデルの読み込みエラー: {:?}", e))?;

    Ok(model_config.init::<B>(device)?.load_record(record))
}
