//! Xception系の特徴抽出バックボーン
//!
//! 分類ヘッドを持たず、[batch, channels, h, w] の特徴マップを返します。
//! チャネル幅とミドルブロック数は設定で変更できます。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// バックボーン設定
#[derive(Config, Debug)]
pub struct XceptionConfig {
    /// ステム1層目のチャネル数（2層目はこの2倍）
    pub stem_channels: usize,
    /// エントリーフロー各ブロックの出力チャネル
    pub entry_channels: Vec<usize>,
    /// ミドルフローのブロック数
    pub middle_blocks: usize,
    /// エグジットフローのチャネル [残差ブロック出力, 分離畳み込み1, 分離畳み込み2]
    pub exit_channels: Vec<usize>,
}

impl XceptionConfig {
    /// ImageNet版Xceptionと同じ構成
    pub fn imagenet() -> Self {
        Self::new(32, vec![128, 256, 728], 8, vec![1024, 1536, 2048])
    }

    /// 動作確認用の小さな構成
    pub fn tiny() -> Self {
        Self::new(4, vec![8, 16], 1, vec![16, 24, 32])
    }

    /// 出力特徴のチャネル数
    pub fn out_channels(&self) -> usize {
        self.exit_channels.last().copied().unwrap_or(0)
    }

    /// 入力サイズに対する最終特徴マップの一辺
    ///
    /// ステム: 3x3 stride 2 (padding無し) → 3x3 (padding無し)、
    /// 以降の残差ブロックはそれぞれ ceil(size / 2)。
    pub fn feature_map_size(&self, input_size: usize) -> usize {
        if input_size < 3 {
            return 0;
        }
        let after_stem1 = (input_size - 3) / 2 + 1;
        let mut size = after_stem1.saturating_sub(2);
        // エントリーブロック + エグジットの残差ブロック
        for _ in 0..(self.entry_channels.len() + 1) {
            size = (size + 1) / 2;
        }
        size
    }

    /// 構成と入力サイズの整合性を確認
    pub fn validate(&self, input_size: usize) -> anyhow::Result<()> {
        if self.entry_channels.is_empty() {
            anyhow::bail!("entry_channels が空です");
        }
        if self.exit_channels.len() != 3 {
            anyhow::bail!(
                "exit_channels は3要素が必要です (実際: {})",
                self.exit_channels.len()
            );
        }
        if self.feature_map_size(input_size) == 0 {
            anyhow::bail!("入力サイズが小さすぎます: {}x{}", input_size, input_size);
        }
        Ok(())
    }

    /// バックボーンを初期化
    ///
    /// 事前に [`XceptionConfig::validate`] で構成を確認してください。
    pub fn init<B: Backend>(&self, device: &B::Device) -> Xception<B> {
        let stem_out = self.stem_channels * 2;

        let mut entry = Vec::with_capacity(self.entry_channels.len());
        let mut in_channels = stem_out;
        for (i, &out_channels) in self.entry_channels.iter().enumerate() {
            // 1つ目の分離畳み込みで出力チャネルまで広げる
            entry.push(ResidualBlock::new(
                in_channels,
                out_channels,
                out_channels,
                i > 0,
                device,
            ));
            in_channels = out_channels;
        }

        let middle = (0..self.middle_blocks)
            .map(|_| MiddleBlock::new(in_channels, device))
            .collect();

        let exit_block = ResidualBlock::new(
            in_channels,
            in_channels,
            self.exit_channels[0],
            true,
            device,
        );
        let exit_sep1 = SeparableConv2d::new(self.exit_channels[0], self.exit_channels[1], device);
        let exit_sep2 = SeparableConv2d::new(self.exit_channels[1], self.exit_channels[2], device);

        Xception {
            stem1: Conv2dConfig::new([3, self.stem_channels], [3, 3])
                .with_stride([2, 2])
                .with_bias(false)
                .init(device),
            stem1_bn: BatchNormConfig::new(self.stem_channels).init(device),
            stem2: Conv2dConfig::new([self.stem_channels, stem_out], [3, 3])
                .with_bias(false)
                .init(device),
            stem2_bn: BatchNormConfig::new(stem_out).init(device),
            entry,
            middle,
            exit_block,
            exit_sep1,
            exit_bn1: BatchNormConfig::new(self.exit_channels[1]).init(device),
            exit_sep2,
            exit_bn2: BatchNormConfig::new(self.exit_channels[2]).init(device),
            activation: Relu::new(),
            out_channels: self.exit_channels[2],
        }
    }
}

/// 深さ方向分離畳み込み（depthwise 3x3 + pointwise 1x1）
#[derive(Module, Debug)]
pub struct SeparableConv2d<B: Backend> {
    depthwise: Conv2d<B>,
    pointwise: Conv2d<B>,
}

impl<B: Backend> SeparableConv2d<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            depthwise: Conv2dConfig::new([in_channels, in_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(in_channels)
                .with_bias(false)
                .init(device),
            pointwise: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.depthwise.forward(x))
    }
}

/// ダウンサンプリング付き残差ブロック
///
/// 本体: [ReLU] → Sep → BN → ReLU → Sep → BN → MaxPool(3x3, stride 2)
/// 残差: 1x1 Conv (stride 2) → BN
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    residual: Conv2d<B>,
    residual_bn: BatchNorm<B>,
    pre_activation: Option<Relu>,
    sep1: SeparableConv2d<B>,
    bn1: BatchNorm<B>,
    sep2: SeparableConv2d<B>,
    bn2: BatchNorm<B>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(
        in_channels: usize,
        mid_channels: usize,
        out_channels: usize,
        pre_activation: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            residual: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([2, 2])
                .with_bias(false)
                .init(device),
            residual_bn: BatchNormConfig::new(out_channels).init(device),
            pre_activation: pre_activation.then(Relu::new),
            sep1: SeparableConv2d::new(in_channels, mid_channels, device),
            bn1: BatchNormConfig::new(mid_channels).init(device),
            sep2: SeparableConv2d::new(mid_channels, out_channels, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = self.residual_bn.forward(self.residual.forward(x.clone()));

        let x = match &self.pre_activation {
            Some(relu) => relu.forward(x),
            None => x,
        };
        let x = self.bn1.forward(self.sep1.forward(x));
        let x = self.activation.forward(x);
        let x = self.bn2.forward(self.sep2.forward(x));
        let x = self.pool.forward(x);

        x + residual
    }
}

/// ミドルフローのブロック（ReLU → Sep → BN を3回、恒等残差）
#[derive(Module, Debug)]
pub struct MiddleBlock<B: Backend> {
    sep1: SeparableConv2d<B>,
    bn1: BatchNorm<B>,
    sep2: SeparableConv2d<B>,
    bn2: BatchNorm<B>,
    sep3: SeparableConv2d<B>,
    bn3: BatchNorm<B>,
    activation: Relu,
}

impl<B: Backend> MiddleBlock<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            sep1: SeparableConv2d::new(channels, channels, device),
            bn1: BatchNormConfig::new(channels).init(device),
            sep2: SeparableConv2d::new(channels, channels, device),
            bn2: BatchNormConfig::new(channels).init(device),
            sep3: SeparableConv2d::new(channels, channels, device),
            bn3: BatchNormConfig::new(channels).init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = x.clone();
        let x = self.bn1.forward(self.sep1.forward(self.activation.forward(x)));
        let x = self.bn2.forward(self.sep2.forward(self.activation.forward(x)));
        let x = self.bn3.forward(self.sep3.forward(self.activation.forward(x)));
        x + residual
    }
}

/// Xception系バックボーン
///
/// # アーキテクチャ
/// - ステム: Conv 3x3 stride 2 → BN → ReLU → Conv 3x3 → BN → ReLU
/// - エントリーフロー: ダウンサンプリング残差ブロック x N
/// - ミドルフロー: 恒等残差ブロック x M
/// - エグジットフロー: 残差ブロック → Sep → BN → ReLU → Sep → BN → ReLU
#[derive(Module, Debug)]
pub struct Xception<B: Backend> {
    stem1: Conv2d<B>,
    stem1_bn: BatchNorm<B>,
    stem2: Conv2d<B>,
    stem2_bn: BatchNorm<B>,
    entry: Vec<ResidualBlock<B>>,
    middle: Vec<MiddleBlock<B>>,
    exit_block: ResidualBlock<B>,
    exit_sep1: SeparableConv2d<B>,
    exit_bn1: BatchNorm<B>,
    exit_sep2: SeparableConv2d<B>,
    exit_bn2: BatchNorm<B>,
    activation: Relu,
    out_channels: usize,
}

impl<B: Backend> Xception<B> {
    /// 出力特徴のチャネル数
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - 特徴マップ [batch_size, out_channels, h, w]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem1_bn.forward(self.stem1.forward(images));
        let x = self.activation.forward(x);
        let x = self.stem2_bn.forward(self.stem2.forward(x));
        let mut x = self.activation.forward(x);

        for block in &self.entry {
            x = block.forward(x);
        }
        for block in &self.middle {
            x = block.forward(x);
        }

        let x = self.exit_block.forward(x);
        let x = self.exit_bn1.forward(self.exit_sep1.forward(x));
        let x = self.activation.forward(x);
        let x = self.exit_bn2.forward(self.exit_sep2.forward(x));
        self.activation.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_feature_map_size_imagenet() {
        // 299 -> 149 -> 147 -> 74 -> 37 -> 19 -> 10
        assert_eq!(XceptionConfig::imagenet().feature_map_size(299), 10);
    }

    #[test]
    fn test_validate_rejects_small_input() {
        let config = XceptionConfig::tiny();
        assert!(config.validate(5).is_err());
        assert!(config.validate(32).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_exit_channels() {
        let config = XceptionConfig::new(4, vec![8], 0, vec![16, 32]);
        assert!(config.validate(32).is_err());
    }

    #[test]
    fn test_forward_output_shape() {
        let device = NdArrayDevice::Cpu;
        let config = XceptionConfig::tiny();
        let backbone = config.init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let features = backbone.forward(images);

        let size = config.feature_map_size(32);
        assert_eq!(features.dims(), [2, config.out_channels(), size, size]);
        assert_eq!(backbone.out_channels(), 32);
    }
}
