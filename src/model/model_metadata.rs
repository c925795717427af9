//! モデルメタデータの定義と永続化
//!
//! 画像分類パッケージ（tar.gz）に同梱するメタデータです。
//!
//! ## 入力の仕様
//! - 入力テンソル名: `image`（画像入力として扱う）
//! - 画素値: 0-255 の値に `image_scale` を掛けたもの
//! - チャネル順序: `is_bgr` が偽の場合 RGB

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::ml_model::ModelConfig;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// モデル名
    pub model_name: String,

    /// 入力テンソル名
    pub input_name: String,

    /// 出力テンソル名（クラス確率）
    pub output_name: String,

    /// 画像として扱う入力の名前
    pub image_input_name: String,

    /// クラスラベル（辞書順）
    /// 例: ["AUD2", "EUR0.05", "EUR0.1", "dump"]
    pub class_labels: Vec<String>,

    /// 画素値に掛ける係数（学習時と同じ値）
    pub image_scale: f32,

    /// チャネル順序がBGRかどうか
    pub is_bgr: bool,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// モデル構造の復元に使用する設定
    pub model_config: ModelConfig,

    /// 学習エポック数
    pub num_epochs: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        model_name: String,
        input_name: String,
        output_name: String,
        class_labels: Vec<String>,
        image_scale: f32,
        is_bgr: bool,
        model_config: ModelConfig,
        num_epochs: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();
        let image_input_name = input_name.clone();
        let image_size = model_config.image_size;

        Self {
            model_name,
            input_name,
            output_name,
            image_input_name,
            class_labels,
            image_scale,
            is_bgr,
            image_size,
            model_config,
            num_epochs,
            trained_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::backbone::XceptionConfig;

    #[test]
    fn test_metadata_json_roundtrip() {
        let metadata = ModelMetadata::new(
            "CoinClassifier".to_string(),
            "image".to_string(),
            "output".to_string(),
            vec!["EUR1".to_string(), "dump".to_string()],
            1.0 / 255.0,
            false,
            ModelConfig::new(2, XceptionConfig::tiny()).with_image_size(32),
            20,
        );

        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();

        assert_eq!(restored.image_input_name, "image");
        assert_eq!(restored.class_labels, vec!["EUR1", "dump"]);
        assert_eq!(restored.image_size, 32);
        assert_eq!(restored.model_config.num_classes, 2);
        assert!(!restored.is_bgr);
        assert!(!restored.trained_at.is_empty());
    }
}
