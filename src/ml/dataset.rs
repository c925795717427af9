//! 画像ディレクトリからの学習データセット
//!
//! 画像ルート直下のサブディレクトリ名をクラス名とし、名前順にクラスIDを割り当てます。
//! 学習用/検証用の分割はクラスごとに決定的に行います（ファイル名順で先頭が検証用）。

use anyhow::{Context, Result};
use burn_dataset::Dataset;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 読み込み対象の画像拡張子
const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// クラス名とクラスIDの対応（IDは並び順の位置）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIndex {
    names: Vec<String>,
}

impl ClassIndex {
    /// 画像ルート直下のサブディレクトリを名前順に走査する
    pub fn discover(root: &Path) -> Result<Self> {
        let mut names = Vec::new();

        let entries = std::fs::read_dir(root)
            .with_context(|| format!("画像ディレクトリを開けません: {}", root.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            if path.is_dir() {
                let class_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {}", path.display()))?
                    .to_string();
                names.push(class_name);
            }
        }

        names.sort();
        Ok(Self { names })
    }

    /// 指定された順序でクラスIDを割り当てる
    pub fn from_order(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// クラスID順のクラス名
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// クラス名 -> クラスID
    pub fn class_indices(&self) -> BTreeMap<String, usize> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect()
    }

    /// 辞書順に並べたクラス名（エクスポート時のラベル一覧）
    ///
    /// クラスID順ではありません。ID順と辞書順が異なる場合、
    /// エクスポートされたモデルのラベルはIDとずれます。
    pub fn sorted_labels(&self) -> Vec<String> {
        let mut labels = self.names.clone();
        labels.sort();
        labels
    }
}

/// データセットの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subset {
    Training,
    Validation,
}

impl std::fmt::Display for Subset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subset::Training => write!(f, "training"),
            Subset::Validation => write!(f, "validation"),
        }
    }
}

/// 学習データセット（パスのリストのみ保持）
pub struct CoinDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    class_index: ClassIndex,
    subset: Subset,
}

impl CoinDataset {
    /// ディレクトリを走査してデータセットを構築する
    pub fn from_directory(root: &Path, subset: Subset, validation_split: f64) -> Result<Self> {
        let class_index = ClassIndex::discover(root)?;
        if class_index.is_empty() {
            anyhow::bail!("クラスディレクトリが見つかりません: {}", root.display());
        }
        Self::from_directory_with_classes(root, class_index, subset, validation_split)
    }

    /// 指定されたクラス対応でデータセットを構築する
    ///
    /// クラスごとに画像をファイル名順に並べ、先頭 floor(n * validation_split) 枚を検証用、
    /// 残りを学習用とします。
    pub fn from_directory_with_classes(
        root: &Path,
        class_index: ClassIndex,
        subset: Subset,
        validation_split: f64,
    ) -> Result<Self> {
        if !(0.0..1.0).contains(&validation_split) {
            anyhow::bail!("validation_split は 0 以上 1 未満が必要です: {}", validation_split);
        }

        let mut samples = Vec::new();

        for (class_id, class_name) in class_index.names().iter().enumerate() {
            let class_dir = root.join(class_name);
            if !class_dir.exists() {
                continue;
            }

            let images = list_images(&class_dir)?;
            let split_at = (images.len() as f64 * validation_split) as usize;

            let selected = match subset {
                Subset::Validation => &images[..split_at],
                Subset::Training => &images[split_at..],
            };
            samples.extend(selected.iter().map(|path| (path.clone(), class_id)));
        }

        Ok(Self {
            samples,
            class_index,
            subset,
        })
    }

    pub fn class_index(&self) -> &ClassIndex {
        &self.class_index
    }

    pub fn num_classes(&self) -> usize {
        self.class_index.len()
    }

    pub fn subset(&self) -> Subset {
        self.subset
    }

    pub fn samples(&self) -> &[(PathBuf, usize)] {
        &self.samples
    }

    /// クラスごとのサンプル数
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes()];
        for (_, id) in &self.samples {
            counts[*id] += 1;
        }
        counts
    }

    /// 読み込み結果をログに出力
    pub fn log_summary(&self) {
        tracing::info!(
            "Found {} images belonging to {} classes ({})",
            self.samples.len(),
            self.num_classes(),
            self.subset
        );
        for (i, (name, count)) in self
            .class_index
            .names()
            .iter()
            .zip(self.class_counts())
            .enumerate()
        {
            tracing::debug!("  Class {}: {} ({} samples)", i, name, count);
        }
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct CoinItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<CoinItem> for CoinDataset {
    fn get(&self, index: usize) -> Option<CoinItem> {
        let (path, label) = self.samples.get(index)?;
        Some(CoinItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// クラスディレクトリ内の画像をパス順で列挙する
fn list_images(class_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    let entries = std::fs::read_dir(class_dir)
        .with_context(|| format!("クラスディレクトリを開けません: {}", class_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(ext) = path.extension() {
            let ext_str = ext.to_string_lossy().to_lowercase();
            if IMAGE_EXTENSIONS.contains(&ext_str.as_str()) {
                images.push(path);
            }
        }
    }

    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::test_util::write_image_tree;

    #[test]
    fn test_discover_sorts_class_names() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("USD0.25", 1), ("EUR1", 1), ("dump", 1)], 8);

        let classes = ClassIndex::discover(dir.path()).unwrap();
        assert_eq!(classes.names(), &["EUR1", "USD0.25", "dump"]);
        assert_eq!(classes.index_of("dump"), Some(2));
    }

    #[test]
    fn test_discover_ignores_files_at_root() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 1), ("B", 1)], 8);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let classes = ClassIndex::discover(dir.path()).unwrap();
        assert_eq!(classes.len(), 2);
    }

    #[test]
    fn test_split_is_per_class_and_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 10), ("B", 5)], 8);

        let train = CoinDataset::from_directory(dir.path(), Subset::Training, 0.2).unwrap();
        let valid = CoinDataset::from_directory(dir.path(), Subset::Validation, 0.2).unwrap();

        // A: 10 -> 2 検証 / 8 学習, B: 5 -> 1 検証 / 4 学習
        assert_eq!(valid.class_counts(), vec![2, 1]);
        assert_eq!(train.class_counts(), vec![8, 4]);

        for (path, _) in valid.samples() {
            assert!(!train.samples().iter().any(|(p, _)| p == path));
        }
    }

    #[test]
    fn test_validation_takes_first_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 5)], 8);

        let valid = CoinDataset::from_directory(dir.path(), Subset::Validation, 0.2).unwrap();
        let first = valid.samples()[0].0.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(first, "img_000.png");
    }

    #[test]
    fn test_split_fraction_uses_double_precision() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 10)], 8);

        // 10 * 0.7 = 7.0（単精度の 0.7 では 6.99... => 6 になる）
        let valid = CoinDataset::from_directory(dir.path(), Subset::Validation, 0.7).unwrap();
        let train = CoinDataset::from_directory(dir.path(), Subset::Training, 0.7).unwrap();
        assert_eq!(valid.len(), 7);
        assert_eq!(train.len(), 3);
    }

    #[test]
    fn test_subsets_share_class_mapping() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("b", 3), ("a", 3), ("c", 3)], 8);

        let train = CoinDataset::from_directory(dir.path(), Subset::Training, 0.2).unwrap();
        let valid = CoinDataset::from_directory(dir.path(), Subset::Validation, 0.2).unwrap();
        assert_eq!(train.class_index(), valid.class_index());
        assert_eq!(train.class_index().class_indices(), valid.class_index().class_indices());
    }

    #[test]
    fn test_non_image_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 2)], 8);
        std::fs::write(dir.path().join("A").join("readme.md"), "x").unwrap();

        let train = CoinDataset::from_directory(dir.path(), Subset::Training, 0.0).unwrap();
        assert_eq!(train.len(), 2);
    }

    #[test]
    fn test_empty_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CoinDataset::from_directory(dir.path(), Subset::Training, 0.2).is_err());
    }

    #[test]
    fn test_invalid_split_is_error() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path(), &[("A", 2)], 8);
        assert!(CoinDataset::from_directory(dir.path(), Subset::Training, 1.0).is_err());
    }

    #[test]
    fn test_sorted_labels_ignore_index_order() {
        let classes = ClassIndex::from_order(vec!["b".into(), "a".into(), "c".into()]);
        assert_eq!(classes.index_of("b"), Some(0));
        assert_eq!(classes.sorted_labels(), vec!["a", "b", "c"]);
    }
}
