//! 機械学習モデルの共通定義
//!
//! コイン分類用のモデル（バックボーン + グローバル平均プーリング + 全結合）を提供します。

use std::path::Path;

use anyhow::Result;
use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::ClassificationOutput,
};

use crate::ml::backbone::{Xception, XceptionConfig};

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数（画像ルート直下のサブディレクトリ数）
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 299)]
    pub image_size: usize,
    /// バックボーン構成
    pub backbone: XceptionConfig,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<CoinClassifier<B>> {
        if self.num_classes == 0 {
            anyhow::bail!("分類クラス数が0です");
        }
        self.backbone.validate(self.image_size)?;

        let feature_map_size = self.backbone.feature_map_size(self.image_size);
        let features = self.backbone.out_channels();

        tracing::debug!("[Model] 入力サイズ: {}x{}x3", self.image_size, self.image_size);
        tracing::debug!(
            "[Model] バックボーン出力: {} x {}x{}",
            features,
            feature_map_size,
            feature_map_size
        );
        tracing::debug!("[Model] GlobalAveragePooling後: {}", features);
        tracing::debug!("[Model] Dense: {} -> {} (softmax)", features, self.num_classes);

        Ok(CoinClassifier {
            backbone: self.backbone.init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(features, self.num_classes).init(device),
            num_classes: self.num_classes,
            frozen_backbone: false,
        })
    }
}

/// コイン分類モデル
///
/// # アーキテクチャ
/// - Xception系バックボーン（分類ヘッドなし）
/// - GlobalAveragePooling2D
/// - Dense: features -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct CoinClassifier<B: Backend> {
    backbone: Xception<B>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    num_classes: usize,
    frozen_backbone: bool,
}

impl<B: Backend> CoinClassifier<B> {
    /// 分類クラス数
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// バックボーンへの参照
    pub fn backbone(&self) -> &Xception<B> {
        &self.backbone
    }

    /// 事前学習済みのバックボーン重みを読み込む
    ///
    /// `freeze` が真の場合、バックボーンのパラメータは勾配計算から外れ、
    /// 学習中も推論モードで実行されます（BatchNormの統計量も更新されません）。
    pub fn with_pretrained_backbone(
        self,
        weights_path: &Path,
        freeze: bool,
        device: &B::Device,
    ) -> Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let backbone = self
            .backbone
            .load_file(weights_path.to_path_buf(), &recorder, device)
            .map_err(|e| {
                anyhow::anyhow!(
                    "バックボーン重みの読み込みエラー ({}): {:?}",
                    weights_path.display(),
                    e
                )
            })?;

        let backbone = if freeze { backbone.no_grad() } else { backbone };

        Ok(Self {
            backbone,
            frozen_backbone: freeze,
            ..self
        })
    }

    /// バックボーンが凍結されているか
    pub fn is_backbone_frozen(&self) -> bool {
        self.frozen_backbone
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_head(self.backbone.forward(images))
    }

    /// 特徴マップからロジットを計算
    fn forward_head(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.head.forward(x)
    }

    /// softmax適用後のクラス確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID [batch_size, 1], クラス確率)
    pub fn predict(&self, images: Tensor<B, 4>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let probabilities = self.forward_probabilities(images);
        let predictions = probabilities.clone().argmax(1);
        (predictions, probabilities)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// 整数ラベルに対する交差エントロピー（sparse categorical cross-entropy）。
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    /// - `targets`: ターゲットラベル [batch_size]
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        self.classification_output(self.forward(images), targets)
    }

    fn classification_output(
        &self,
        output: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// 構造サマリーをログに出力
    pub fn log_summary(&self) {
        tracing::info!("=== Backbone ===\n{}", self.backbone);
        tracing::info!("Backbone params: {}", self.backbone.num_params());
        tracing::info!("=== CoinClassifier ===\n{}", self);
        tracing::info!("Total params: {}", self.num_params());
    }
}

impl<B: AutodiffBackend> CoinClassifier<B> {
    /// 学習時の順伝播と損失計算
    ///
    /// 凍結したバックボーンは内部バックエンド上で推論モードとして実行し、
    /// 分類ヘッドだけを計算グラフに載せます。
    pub fn forward_training(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let features = if self.frozen_backbone {
            let backbone = self.backbone.valid();
            Tensor::from_inner(backbone.forward(images.inner()))
        } else {
            self.backbone.forward(images)
        };

        self.classification_output(self.forward_head(features), targets)
    }
}
