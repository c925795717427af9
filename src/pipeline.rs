//! 学習パイプライン
//!
//! 1. 実行ディレクトリの割り当てとログ出力の開始
//! 2. 学習/検証データセットの構築
//! 3. モデルの組み立て
//! 4. 学習とチェックポイントの保存
//! 5. 画像分類パッケージと軽量モデルの書き出し
//!
//! どの段階で失敗しても以降の段階は実行しません。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};

use crate::logging::init_run_logging;
use crate::ml::dataset::{CoinDataset, Subset};
use crate::ml::export::{export_lite, export_vision_package, lite_model_path, save_model_config};
use crate::ml::ml_model::ModelConfig;
use crate::ml::training::{save_checkpoint, train_model, EpochStats};
use crate::model::config::PipelineConfig;
use crate::model::label_manifest::LabelManifest;
use crate::run_dir::{allocate_run_dir, RunDirectory};

/// パイプラインの実行結果
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run_dir: RunDirectory,
    pub log_path: PathBuf,
    pub checkpoint: PathBuf,
    pub model_config: PathBuf,
    pub labels: PathBuf,
    pub vision_package: PathBuf,
    pub lite_model: PathBuf,
    /// パッケージに埋め込んだラベル（辞書順）
    pub class_labels: Vec<String>,
    pub history: Vec<EpochStats>,
}

/// パイプラインを実行
///
/// ログは実行ディレクトリの log.txt にも書き出されます。失敗した場合もエラー内容を記録してから返します。
pub fn run<B: AutodiffBackend>(config: &PipelineConfig, device: &B::Device) -> Result<PipelineOutcome> {
    let run_dir = allocate_run_dir(&config.output_root)?;
    let log_guard = init_run_logging(&run_dir.path, &config.log_level)?;
    let log_path = log_guard.log_path().to_path_buf();

    tracing::info!("実行ディレクトリ: {}", run_dir.path.display());

    let result = run_in_dir::<B>(config, device, &run_dir, log_path);
    if let Err(ref e) = result {
        tracing::error!("パイプラインが失敗しました: {:#}", e);
    }

    drop(log_guard);
    result
}

fn run_in_dir<B: AutodiffBackend>(
    config: &PipelineConfig,
    device: &B::Device,
    run_dir: &RunDirectory,
    log_path: PathBuf,
) -> Result<PipelineOutcome> {
    config.display();

    // === データセット ===
    let image_dir = &config.data.image_dir;
    let split = config.data.validation_split;
    let dataset_train = CoinDataset::from_directory(image_dir, Subset::Training, split)
        .context("学習データの読み込みに失敗しました")?;
    let dataset_valid = CoinDataset::from_directory(image_dir, Subset::Validation, split)
        .context("検証データの読み込みに失敗しました")?;

    if dataset_train.class_index() != dataset_valid.class_index() {
        anyhow::bail!("学習データと検証データのクラス対応が一致しません");
    }
    dataset_train.log_summary();
    dataset_valid.log_summary();

    let class_index = dataset_train.class_index().clone();
    if class_index.len() == 1 {
        tracing::warn!("クラスが1つしかありません: {}", class_index.names().join(", "));
    }
    tracing::info!("クラス対応: {:?}", class_index.class_indices());

    let labels_path = LabelManifest::from_class_index(&class_index, image_dir).save(&run_dir.path)?;

    // === モデル ===
    let model_config = ModelConfig::new(class_index.len(), config.model.backbone.clone())
        .with_image_size(config.data.image_size);
    let mut model = model_config.init::<B>(device)?;

    match config.model.backbone_weights {
        Some(ref weights) => {
            tracing::info!("事前学習済みバックボーンを読み込みます: {}", weights.display());
            model = model.with_pretrained_backbone(weights, config.model.freeze_backbone, device)?;
            if config.model.freeze_backbone {
                tracing::info!("バックボーンを凍結しました");
            }
        }
        None => {
            tracing::warn!("バックボーン重みが指定されていません。初期値から学習します");
        }
    }

    model.log_summary();
    let model_config_path = save_model_config(&model_config, &run_dir.path)?;

    // === 学習 ===
    let run = train_model(model, dataset_train, dataset_valid, config, device)?;

    let checkpoint = save_checkpoint(&run.model, &run_dir.file(&config.export.model_name))?;

    // === エクスポート ===
    let manifest = LabelManifest::load(&labels_path)?;
    let inference_model = run.model.valid();

    let vision_package = export_vision_package(
        &inference_model,
        &model_config,
        &manifest,
        &config.export,
        config.augmentation.rescale,
        config.training.num_epochs,
        &run_dir.path,
    )?;

    let lite_source = lite_source(config, &checkpoint);
    let lite_model = export_lite::<B::InnerBackend>(
        &lite_source,
        &model_config,
        &lite_model_path(&run_dir.path, &config.export.model_name),
        device,
    )?;

    tracing::info!("完了: {}", run_dir.path.display());

    Ok(PipelineOutcome {
        run_dir: run_dir.clone(),
        log_path,
        checkpoint,
        model_config: model_config_path,
        labels: labels_path,
        vision_package,
        lite_model,
        class_labels: manifest.sorted_labels(),
        history: run.history,
    })
}

/// 軽量モデルの変換元（未指定なら今回のチェックポイント）
fn lite_source(config: &PipelineConfig, checkpoint: &Path) -> PathBuf {
    config
        .export
        .lite_source
        .clone()
        .unwrap_or_else(|| checkpoint.to_path_buf())
}
