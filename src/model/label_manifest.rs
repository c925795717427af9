//! クラス対応表（labels.json）
//!
//! 学習時に確定したクラス名とクラスIDの対応をチェックポイントと同じディレクトリに保存し、
//! エクスポート時はこのファイルからラベルを読み込みます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::ml::dataset::ClassIndex;

/// labels.json の内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelManifest {
    /// クラス名 -> クラスID
    pub class_indices: BTreeMap<String, usize>,
    /// 学習に使用した画像ルート
    pub image_root: PathBuf,
    /// 作成時刻（ISO8601形式）
    pub created_at: String,
}

impl LabelManifest {
    pub const FILE_NAME: &'static str = "labels.json";

    pub fn from_class_index(class_index: &ClassIndex, image_root: &Path) -> Self {
        Self {
            class_indices: class_index.class_indices(),
            image_root: image_root.to_path_buf(),
            created_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// クラスID順の対応に戻す
    ///
    /// IDが 0..n の連番でない場合はエラーを返します。
    pub fn to_class_index(&self) -> Result<ClassIndex> {
        let mut names: Vec<Option<String>> = vec![None; self.class_indices.len()];
        for (name, &index) in &self.class_indices {
            let slot = names
                .get_mut(index)
                .ok_or_else(|| anyhow::anyhow!("クラスIDが範囲外です: {} -> {}", name, index))?;
            if slot.is_some() {
                anyhow::bail!("クラスIDが重複しています: {}", index);
            }
            *slot = Some(name.clone());
        }

        let names = names.into_iter().flatten().collect();
        Ok(ClassIndex::from_order(names))
    }

    /// エクスポート用のラベル一覧（辞書順）
    pub fn sorted_labels(&self) -> Vec<String> {
        // BTreeMap のキーは辞書順
        self.class_indices.keys().cloned().collect()
    }

    pub fn num_classes(&self) -> usize {
        self.class_indices.len()
    }

    /// ディレクトリ内に保存する
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(Self::FILE_NAME);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write label manifest: {:?}", path))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read label manifest: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to deserialize label manifest")
    }
}
