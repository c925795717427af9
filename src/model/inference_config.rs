//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use anyhow::{Context, Result};
use std::path::Path;

use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// クラスラベル一覧（パッケージに記録された辞書順）
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub image_size: usize,

    /// 画素値に掛ける係数
    pub image_scale: f32,

    /// チャネル順序がBGRかどうか
    pub is_bgr: bool,

    /// 採用する予測の最低確信度（この値を超える必要がある）
    pub confidence_threshold: f32,
}

impl InferenceConfig {
    /// 予測を採用する確信度のデフォルト
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            image_size: metadata.image_size,
            image_scale: metadata.image_scale,
            is_bgr: metadata.is_bgr,
            confidence_threshold: Self::DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    /// モデルファイルから推論設定を読み込む
    pub fn load_from_model(model_path: &Path) -> Result<Self> {
        let metadata =
            model_storage::load_metadata(model_path).context("Failed to load model metadata")?;
        Ok(Self::from_metadata(&metadata))
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// ラベルからクラスインデックスを取得
    pub fn label_to_index(&self, label: &str) -> Option<usize> {
        self.class_labels.iter().position(|l| l == label)
    }

    /// 確信度が閾値を超えているか
    pub fn is_confident(&self, confidence: f32) -> bool {
        confidence > self.confidence_threshold
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        tracing::info!("=== 推論設定 ===");
        tracing::info!("クラスラベル: {}", self.class_labels.join(", "));
        tracing::info!("モデル入力サイズ: {}x{}", self.image_size, self.image_size);
        tracing::info!("画素係数: {}", self.image_scale);
        tracing::info!("確信度の閾値: {}", self.confidence_threshold);
    }
}
