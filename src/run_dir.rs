//! 実行ディレクトリの割り当て
//!
//! 出力ルート直下に v0, v1, ... の順で未使用の番号のディレクトリを作成します。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// 割り当てられた実行ディレクトリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    pub path: PathBuf,
    pub version: usize,
}

impl RunDirectory {
    /// ディレクトリ名（"v{n}"）
    pub fn name(&self) -> String {
        version_name(self.version)
    }

    /// 実行ディレクトリ内のファイルパス
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

fn version_name(version: usize) -> String {
    format!("v{}", version)
}

/// 次の未使用の v{n} を作成して返す
///
/// 出力ルートが存在しない場合は作成します。既存のディレクトリには触れません。
pub fn allocate_run_dir(output_root: &Path) -> Result<RunDirectory> {
    std::fs::create_dir_all(output_root)
        .with_context(|| format!("Failed to create output root: {:?}", output_root))?;

    let mut version = 0;
    loop {
        let path = output_root.join(version_name(version));
        if !path.is_dir() {
            // 同名のファイルがある場合は作成に失敗する
            std::fs::create_dir(&path)
                .with_context(|| format!("Failed to create run directory: {:?}", path))?;
            return Ok(RunDirectory { path, version });
        }
        version += 1;
    }
}
