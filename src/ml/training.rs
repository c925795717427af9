//! モデル学習
//!
//! エポックごとに `floor(n / batch_size)` バッチだけ学習し、同じ規則で検証します。
//! 端数のサンプルはそのエポックでは使われません。

use std::path::{Path, PathBuf};

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::{AutodiffModule, Module},
    optim::{AdamConfig, Optimizer},
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};
use burn_dataset::Dataset;

use crate::ml::augmentation::Augmenter;
use crate::ml::batcher::{CoinBatch, CoinBatcher};
use crate::ml::dataset::CoinDataset;
use crate::ml::ml_model::CoinClassifier;
use crate::model::config::PipelineConfig;

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<CoinBatch<B>, ClassificationOutput<B>> for CoinClassifier<B> {
    fn step(&self, batch: CoinBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_training(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<CoinBatch<B>, ClassificationOutput<B>> for CoinClassifier<B> {
    fn step(&self, batch: CoinBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 1エポックあたりのステップ数（端数切り捨て）
pub fn steps_per_epoch(sample_count: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    sample_count / batch_size
}

/// エポックごとの学習結果
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_steps: usize,
    pub valid_steps: usize,
    /// ステップが0の場合は None
    pub train_loss: Option<f64>,
    pub train_accuracy: Option<f64>,
    pub valid_loss: Option<f64>,
    pub valid_accuracy: Option<f64>,
}

impl EpochStats {
    fn log(&self, num_epochs: usize) {
        tracing::info!(
            "Epoch {}/{} - {} steps - loss: {} - accuracy: {} - val_loss: {} - val_accuracy: {}",
            self.epoch,
            num_epochs,
            self.train_steps,
            fmt_metric(self.train_loss),
            fmt_metric(self.train_accuracy),
            fmt_metric(self.valid_loss),
            fmt_metric(self.valid_accuracy)
        );
    }
}

fn fmt_metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.4}", v),
        None => "-".to_string(),
    }
}

/// 損失と正解数の集計
#[derive(Default)]
struct MetricAccumulator {
    loss_sum: f64,
    correct: usize,
    samples: usize,
    steps: usize,
}

impl MetricAccumulator {
    fn update<B: Backend>(&mut self, output: &ClassificationOutput<B>) {
        let batch_size = output.targets.dims()[0];
        let loss = output.loss.clone().into_scalar().elem::<f64>();

        let predicted = output.output.clone().argmax(1).flatten::<1>(0, 1);
        let correct = predicted
            .equal(output.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += loss;
        self.correct += correct as usize;
        self.samples += batch_size;
        self.steps += 1;
    }

    fn mean_loss(&self) -> Option<f64> {
        (self.steps > 0).then(|| self.loss_sum / self.steps as f64)
    }

    fn accuracy(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.correct as f64 / self.samples as f64)
    }
}

/// 学習結果
pub struct TrainingRun<B: AutodiffBackend> {
    pub model: CoinClassifier<B>,
    pub history: Vec<EpochStats>,
}

/// モデル学習を実行
///
/// 学習データはエポックごとにシャッフルされます。データ拡張は学習データに常に適用し、
/// 検証データには `augmentation.augment_validation` が真の場合のみ適用します。
pub fn train_model<B: AutodiffBackend>(
    mut model: CoinClassifier<B>,
    dataset_train: CoinDataset,
    dataset_valid: CoinDataset,
    config: &PipelineConfig,
    device: &B::Device,
) -> Result<TrainingRun<B>> {
    let batch_size = config.data.batch_size;
    if batch_size == 0 {
        anyhow::bail!("バッチサイズが0です");
    }

    let num_epochs = config.training.num_epochs;
    let train_steps = steps_per_epoch(dataset_train.len(), batch_size);
    let valid_steps = steps_per_epoch(dataset_valid.len(), batch_size);

    tracing::info!("学習データ: {} 枚 ({} steps/epoch)", dataset_train.len(), train_steps);
    tracing::info!("検証データ: {} 枚 ({} steps/epoch)", dataset_valid.len(), valid_steps);
    if train_steps == 0 {
        tracing::warn!(
            "学習データ ({} 枚) がバッチサイズ ({}) 未満のため、重みは更新されません",
            dataset_train.len(),
            batch_size
        );
    }

    // 学習データと検証データは同じデータ拡張設定を共有する
    let augmenter = Augmenter::new(config.augmentation.clone());
    let image_size = config.data.image_size;
    let rescale = config.augmentation.rescale;

    let batcher_train = CoinBatcher::<B>::new(device.clone(), image_size, rescale)
        .with_augmenter(augmenter.clone());
    let mut batcher_valid = CoinBatcher::<B::InnerBackend>::new(device.clone(), image_size, rescale);
    if config.augmentation.augment_validation {
        batcher_valid = batcher_valid.with_augmenter(augmenter);
    }

    // データローダー作成（num_workers=0でオンデマンド読み込み）
    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(batch_size)
        .shuffle(config.training.seed)
        .num_workers(0)
        .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(batch_size)
        .shuffle(config.training.seed.wrapping_add(1))
        .num_workers(0)
        .build(dataset_valid);

    let mut optim = AdamConfig::new().init::<B, CoinClassifier<B>>();
    let learning_rate = config.training.learning_rate;

    tracing::info!(
        "学習を開始します: エポック数 {}, バッチサイズ {}, 学習率 {}",
        num_epochs,
        batch_size,
        learning_rate
    );

    let mut history = Vec::with_capacity(num_epochs);

    for epoch in 1..=num_epochs {
        let mut train_metrics = MetricAccumulator::default();
        for batch in dataloader_train.iter().take(train_steps) {
            let output = TrainStep::step(&model, batch);
            train_metrics.update(&output.item);
            model = optim.step(learning_rate, model, output.grads);
        }

        let model_valid = model.valid();
        let mut valid_metrics = MetricAccumulator::default();
        for batch in dataloader_valid.iter().take(valid_steps) {
            let output = ValidStep::step(&model_valid, batch);
            valid_metrics.update(&output);
        }

        let stats = EpochStats {
            epoch,
            train_steps: train_metrics.steps,
            valid_steps: valid_metrics.steps,
            train_loss: train_metrics.mean_loss(),
            train_accuracy: train_metrics.accuracy(),
            valid_loss: valid_metrics.mean_loss(),
            valid_accuracy: valid_metrics.accuracy(),
        };
        stats.log(num_epochs);
        history.push(stats);
    }

    tracing::info!("学習が完了しました");

    Ok(TrainingRun { model, history })
}

/// チェックポイント（構造 + 重み）を保存
///
/// # 戻り値
/// - 保存されたファイルパス（`<path>.mpk`）
pub fn save_checkpoint<B: Backend>(model: &CoinClassifier<B>, path: &Path) -> Result<PathBuf> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| anyhow::anyhow!("チェックポイントの保存エラー ({}): {:?}", path.display(), e))?;

    let saved = path.with_extension("mpk");
    let size = std::fs::metadata(&saved)?.len();
    tracing::info!(
        "チェックポイントを保存しました: {} ({:.2} MB)",
        saved.display(),
        size as f64 / 1024.0 / 1024.0
    );

    Ok(saved)
}

/// チェックポイントを読み込む
pub fn load_checkpoint<B: Backend>(
    model: CoinClassifier<B>,
    path: &Path,
    device: &B::Device,
) -> Result<CoinClassifier<B>> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| anyhow::anyhow!("チェックポイントの読み込みエラー ({}): {:?}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::backbone::XceptionConfig;
    use crate::ml::dataset::Subset;
    use crate::ml::ml_model::ModelConfig;
    use crate::ml::test_util::write_image_tree;
    use burn::tensor::Tensor;
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn tiny_pipeline_config(batch_size: usize, num_epochs: usize) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.data.image_size = 32;
        config.data.batch_size = batch_size;
        config.training.num_epochs = num_epochs;
        config.model.backbone = XceptionConfig::tiny();
        config
    }

    #[test]
    fn test_steps_per_epoch_drops_remainder() {
        assert_eq!(steps_per_epoch(100, 16), 6);
        assert_eq!(steps_per_epoch(96, 16), 6);
        assert_eq!(steps_per_epoch(15, 16), 0);
        assert_eq!(steps_per_epoch(0, 16), 0);
        assert_eq!(steps_per_epoch(10, 0), 0);
    }

    #[test]
    fn test_train_runs_exact_step_count() {
        let dir = tempfile::tempdir().unwrap();
        // A: 5 -> 学習 4, B: 5 -> 学習 4 => 8 枚, バッチ 3 -> 2 steps
        write_image_tree(dir.path(), &[("A", 5), ("B", 5)], 32);

        let train = CoinDataset::from_directory(dir.path(), Subset::Training, 0.2).unwrap();
        let valid = CoinDataset::from_directory(dir.path(), Subset::Validation, 0.2).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(valid.len(), 2);

        let config = tiny_pipeline_config(3, 2);
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2, XceptionConfig::tiny())
            .with_image_size(32)
            .init::<TestBackend>(&device)
            .unwrap();

        let run = train_model(model, train, valid, &config, &device).unwrap();
        assert_eq!(run.history.len(), 2);
        for stats in &run.history {
            assert_eq!(stats.train_steps, 2);
            assert_eq!(stats.valid_steps, 0);
            assert!(stats.train_loss.unwrap().is_finite());
            assert!(stats.valid_loss.is_none());
        }
    }

    #[test]
    fn test_zero_steps_keeps_weights() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 2), ("B", 2)], 32);

        let train = CoinDataset::from_directory(dir.path(), Subset::Training, 0.2).unwrap();
        let valid = CoinDataset::from_directory(dir.path(), Subset::Validation, 0.2).unwrap();

        let config = tiny_pipeline_config(16, 1);
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2, XceptionConfig::tiny())
            .with_image_size(32)
            .init::<TestBackend>(&device)
            .unwrap();

        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let before: Vec<f32> = model.forward(images.clone()).into_data().to_vec().unwrap();

        let run = train_model(model, train, valid, &config, &device).unwrap();
        assert_eq!(run.history[0].train_steps, 0);

        let after: Vec<f32> = run.model.forward(images).into_data().to_vec().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_frozen_backbone_is_unchanged_by_training() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(&dir.path().join("Images"), &[("A", 5), ("B", 5)], 32);
        let train = CoinDataset::from_directory(&dir.path().join("Images"), Subset::Training, 0.2).unwrap();
        let valid = CoinDataset::from_directory(&dir.path().join("Images"), Subset::Validation, 0.2).unwrap();

        let device = NdArrayDevice::Cpu;
        let weights_path = dir.path().join("backbone");
        XceptionConfig::tiny()
            .init::<TestBackend>(&device)
            .save_file(weights_path.clone(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        let model = ModelConfig::new(2, XceptionConfig::tiny())
            .with_image_size(32)
            .init::<TestBackend>(&device)
            .unwrap()
            .with_pretrained_backbone(&weights_path.with_extension("mpk"), true, &device)
            .unwrap();
        assert!(model.is_backbone_frozen());

        let images = Tensor::<NdArray<f32>, 4>::ones([1, 3, 32, 32], &device);
        let before: Vec<f32> = model
            .valid()
            .backbone()
            .forward(images.clone())
            .into_data()
            .to_vec()
            .unwrap();

        // 8 枚 / バッチ 4 => 2 steps
        let config = tiny_pipeline_config(4, 1);
        let run = train_model(model, train, valid, &config, &device).unwrap();
        assert_eq!(run.history[0].train_steps, 2);

        let after: Vec<f32> = run
            .model
            .valid()
            .backbone()
            .forward(images)
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let device = NdArrayDevice::Cpu;
        let config = ModelConfig::new(3, XceptionConfig::tiny()).with_image_size(32);
        let model = config.init::<NdArray<f32>>(&device).unwrap();

        let saved = save_checkpoint(&model, &dir.path().join("CoinClassifier")).unwrap();
        assert_eq!(saved, dir.path().join("CoinClassifier.mpk"));
        assert!(saved.exists());

        let fresh = config.init::<NdArray<f32>>(&device).unwrap();
        let restored = load_checkpoint(fresh, &saved, &device).unwrap();

        let images = Tensor::<NdArray<f32>, 4>::ones([1, 3, 32, 32], &device);
        let expected: Vec<f32> = model.forward(images.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = restored.forward(images).into_data().to_vec().unwrap();
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5);
        }
    }
}
