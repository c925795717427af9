pub mod augmentation;
pub mod backbone;
pub mod batcher;
pub mod dataset;
pub mod export;
pub mod inference;
pub mod ml_model;
pub mod training;

pub use augmentation::Augmenter;
pub use backbone::{Xception, XceptionConfig};
pub use batcher::{CoinBatch, CoinBatcher};
pub use dataset::{ClassIndex, CoinDataset, CoinItem, Subset};
pub use export::{export_lite, export_vision_package, load_lite, save_model_config};
pub use inference::{InferenceEngine, Prediction};
pub use ml_model::{CoinClassifier, ModelConfig};
pub use training::{load_checkpoint, save_checkpoint, steps_per_epoch, train_model, EpochStats, TrainingRun};

#[cfg(test)]
pub(crate) mod test_util {
    use image::{Rgb, RgbImage};
    use std::path::Path;

    /// `root/<class>/img_NNN.png` を作成する
    pub fn write_image_tree(root: &Path, classes: &[(&str, usize)], size: u32) {
        for (class_id, (class_name, count)) in classes.iter().enumerate() {
            let class_dir = root.join(class_name);
            std::fs::create_dir_all(&class_dir).unwrap();
            for i in 0..*count {
                let shade = ((class_id * 80 + i * 7) % 256) as u8;
                let img = RgbImage::from_fn(size, size, |x, y| {
                    Rgb([shade, (x * 255 / size) as u8, (y * 255 / size) as u8])
                });
                img.save(class_dir.join(format!("img_{:03}.png", i))).unwrap();
            }
        }
    }
}
