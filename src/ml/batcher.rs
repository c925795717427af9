//! バッチ生成

use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Int, Tensor},
};

use crate::ml::augmentation::{load_image, to_chw, Augmenter};
use crate::ml::dataset::CoinItem;

/// バッチャー（画像はバッチ生成時に読み込む）
#[derive(Clone)]
pub struct CoinBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    rescale: f32,
    augmenter: Option<Augmenter>,
}

impl<B: Backend> CoinBatcher<B> {
    pub fn new(device: B::Device, image_size: usize, rescale: f32) -> Self {
        Self {
            device,
            image_size,
            rescale,
            augmenter: None,
        }
    }

    /// ランダム変換を適用するバッチャー
    pub fn with_augmenter(mut self, augmenter: Augmenter) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn is_augmenting(&self) -> bool {
        self.augmenter.is_some()
    }

    /// 1枚分の画素列 [3 * size * size]
    fn load_pixels(&self, item: &CoinItem) -> anyhow::Result<Vec<f32>> {
        let img = load_image(&item.path, self.image_size as u32)?;
        let img = match self.augmenter {
            Some(ref augmenter) => augmenter.augment(&img),
            None => img,
        };
        Ok(to_chw(&img, self.rescale, false))
    }
}

impl<B: Backend> Batcher<B, CoinItem, CoinBatch<B>> for CoinBatcher<B> {
    fn batch(&self, items: Vec<CoinItem>, _device: &B::Device) -> CoinBatch<B> {
        let batch_size = items.len();
        let image_size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * image_size * image_size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            match self.load_pixels(&item) {
                Ok(pixels) => all_pixels.extend_from_slice(&pixels),
                Err(e) => {
                    tracing::warn!("画像読み込み失敗 {}: {:#}", item.path.display(), e);
                    // 読み込めない画像はゼロで埋める
                    all_pixels.extend(vec![0.0f32; 3 * image_size * image_size]);
                }
            }
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, image_size, image_size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        CoinBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct CoinBatch<B: Backend> {
    /// [batch_size, 3, size, size]
    pub images: Tensor<B, 4>,
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_util::write_image_tree;
    use crate::model::config::AugmentationSettings;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn items(root: &std::path::Path) -> Vec<CoinItem> {
        vec![
            CoinItem {
                path: root.join("A").join("img_000.png"),
                label: 0,
            },
            CoinItem {
                path: root.join("B").join("img_000.png"),
                label: 1,
            },
        ]
    }

    #[test]
    fn test_batch_shapes_and_targets() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 1), ("B", 1)], 20);

        let device = NdArrayDevice::Cpu;
        let batcher = CoinBatcher::<TestBackend>::new(NdArrayDevice::Cpu, 8, 1.0 / 255.0);
        let batch = batcher.batch(items(dir.path()), &device);

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        let targets: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(targets, vec![0, 1]);
    }

    #[test]
    fn test_batch_pixels_are_rescaled() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 1), ("B", 1)], 8);

        let device = NdArrayDevice::Cpu;
        let batcher = CoinBatcher::<TestBackend>::new(NdArrayDevice::Cpu, 8, 1.0 / 255.0)
            .with_augmenter(Augmenter::new(AugmentationSettings::default()));
        assert!(batcher.is_augmenting());

        let batch = batcher.batch(items(dir.path()), &device);
        let max: f32 = batch.images.clone().max().into_scalar();
        let min: f32 = batch.images.min().into_scalar();
        assert!(max <= 1.0 + 1e-6);
        assert!(min >= 0.0);
    }

    #[test]
    fn test_unreadable_image_is_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let device = NdArrayDevice::Cpu;
        let batcher = CoinBatcher::<TestBackend>::new(NdArrayDevice::Cpu, 4, 1.0);

        let batch = batcher.batch(
            vec![CoinItem {
                path: dir.path().join("missing.png"),
                label: 3,
            }],
            &device,
        );
        let sum: f32 = batch.images.sum().into_scalar();
        assert_eq!(sum, 0.0);
    }
}
