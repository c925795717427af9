//! パイプライン設定管理モジュール
//!
//! 計算デバイス、データ拡張、学習、エクスポートの設定をJSON形式で保存・読み込みします。
//! デフォルト値は元の学習スクリプトの固定値と同一です。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ml::backbone::XceptionConfig;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 学習データ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// クラスごとのサブディレクトリを持つ画像ルート
    pub image_dir: PathBuf,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 検証データの割合（クラスごとに先頭から切り出す）
    pub validation_split: f64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("Images"),
            image_size: 299,
            batch_size: 16,
            validation_split: 0.2,
        }
    }
}

/// データ拡張設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationSettings {
    /// 画素値に掛ける係数
    pub rescale: f32,
    /// 回転範囲（度）
    pub rotation_range: f32,
    /// せん断範囲（度）
    pub shear_range: f32,
    /// ズーム範囲 [1 - z, 1 + z]
    pub zoom_range: f32,
    /// 横方向シフト（幅に対する割合）
    pub width_shift_range: f32,
    /// 縦方向シフト（高さに対する割合）
    pub height_shift_range: f32,
    /// 水平反転
    pub horizontal_flip: bool,
    /// 検証データにも同じ拡張を適用する
    #[serde(default = "default_true")]
    pub augment_validation: bool,
    /// 乱数シード
    pub seed: u64,
}

fn default_true() -> bool {
    true
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            rescale: 1.0 / 255.0,
            rotation_range: 180.0,
            shear_range: 0.2,
            zoom_range: 0.2,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            horizontal_flip: true,
            augment_validation: true,
            seed: 42,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// バックボーンの構成
    pub backbone: XceptionConfig,
    /// 事前学習済みバックボーン重み（burnの.mpkレコード）
    #[serde(default)]
    pub backbone_weights: Option<PathBuf>,
    /// 事前学習済み重みを読み込んだ場合にバックボーンを凍結する
    pub freeze_backbone: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backbone: XceptionConfig::imagenet(),
            backbone_weights: None,
            freeze_backbone: true,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// 学習率（固定）
    pub learning_rate: f64,
    /// シャッフル用のランダムシード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 20,
            learning_rate: 2e-5,
            seed: 42,
        }
    }
}

/// エクスポート設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    /// 出力ファイル名のベース
    pub model_name: String,
    /// 入力テンソル名
    pub input_name: String,
    /// 出力テンソル名
    pub output_name: String,
    /// チャネル順序がBGRかどうか
    pub is_bgr: bool,
    /// 軽量モデル変換の読み込み元チェックポイント
    ///
    /// 未指定の場合は今回の学習で保存したチェックポイントを使用します。
    #[serde(default)]
    pub lite_source: Option<PathBuf>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            model_name: "CoinClassifier".to_string(),
            input_name: "image".to_string(),
            output_name: "output".to_string(),
            is_bgr: false,
            lite_source: None,
        }
    }
}

/// パイプライン設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// 実行ディレクトリ（v0, v1, ...）を作成するルート
    pub output_root: PathBuf,
    /// ログレベル（trace / debug / info / warn / error）
    pub log_level: String,
    /// 学習データ設定
    pub data: DataSettings,
    /// データ拡張設定
    pub augmentation: AugmentationSettings,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// エクスポート設定
    pub export: ExportSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            output_root: PathBuf::from("docs"),
            log_level: "info".to_string(),
            data: DataSettings::default(),
            augmentation: AugmentationSettings::default(),
            model: ModelSettings::default(),
            training: TrainingSettings::default(),
            export: ExportSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("coin_classifier.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない場合はデフォルト設定を返す
    ///
    /// ファイルが存在するのに読み込めない場合はエラーを返します。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path).map_err(|e| {
                anyhow::anyhow!("設定ファイルの読み込みに失敗しました ({}): {}", path.display(), e)
            })?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        tracing::info!("=== パイプライン設定 ===");
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!("出力ルート: {}", self.output_root.display());
        tracing::info!("画像ディレクトリ: {}", self.data.image_dir.display());
        tracing::info!("画像サイズ: {}x{}", self.data.image_size, self.data.image_size);
        tracing::info!("バッチサイズ: {}", self.data.batch_size);
        tracing::info!("検証データ割合: {}", self.data.validation_split);
        tracing::info!(
            "データ拡張: 回転 ±{}°, せん断 {}, ズーム {}, シフト {}/{}, 水平反転 {}",
            self.augmentation.rotation_range,
            self.augmentation.shear_range,
            self.augmentation.zoom_range,
            self.augmentation.width_shift_range,
            self.augmentation.height_shift_range,
            self.augmentation.horizontal_flip
        );
        tracing::info!("エポック数: {}", self.training.num_epochs);
        tracing::info!("学習率: {}", self.training.learning_rate);
        match self.model.backbone_weights {
            Some(ref weights) => tracing::info!("バックボーン重み: {}", weights.display()),
            None => tracing::info!("バックボーン重み: なし"),
        }
        if let Some(ref source) = self.export.lite_source {
            tracing::info!("軽量モデルの変換元: {}", source.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.output_root, PathBuf::from("docs"));
        assert_eq!(config.data.image_dir, PathBuf::from("Images"));
        assert_eq!(config.data.image_size, 299);
        assert_eq!(config.data.batch_size, 16);
        assert_eq!(config.training.num_epochs, 20);
        assert!((config.training.learning_rate - 2e-5).abs() < 1e-12);
        assert!((config.augmentation.rescale - 1.0 / 255.0).abs() < 1e-9);
        assert_eq!(config.export.model_name, "CoinClassifier");
        assert!(config.export.lite_source.is_none());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: PipelineConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.data.batch_size, deserialized.data.batch_size);
        assert_eq!(
            config.model.backbone.entry_channels,
            deserialized.model.backbone.entry_channels
        );
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(dir.path().join("none.json")).unwrap();
        assert_eq!(config.data.batch_size, 16);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = PipelineConfig::default();
        config.device_type = DeviceType::Cpu;
        config.training.num_epochs = 1;
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.device_type, DeviceType::Cpu);
        assert_eq!(loaded.training.num_epochs, 1);
    }

    #[test]
    fn test_load_or_default_rejects_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(PipelineConfig::load_or_default(&path).is_err());
    }
}
