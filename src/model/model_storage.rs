//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（入出力名、クラスラベル、前処理など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// メタデータと共にモデルをTar.gz形式で保存
///
/// # 戻り値
/// - 保存されたファイルパス
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    // output_pathがすでに.gzで終わっている場合はそのまま、そうでなければ拡張子を追加
    let tar_gz_path = if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    };

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .context(format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームまで閉じる
    tar_builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .context("Failed to finalize tar.gz archive")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .context(format!("Failed to add {} to tar", name))
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut archive = open_archive(tar_gz_path)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        if path.to_str() == Some(METADATA_ENTRY) {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str)?;
            return ModelMetadata::from_json_string(&json_str);
        }
    }

    Err(anyhow::anyhow!("metadata.json not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut archive = open_archive(tar_gz_path)?;

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    tracing::info!("=== モデルメタデータ ===");
    tracing::info!("モデル名: {}", metadata.model_name);
    tracing::info!("入力: {} (画像, 係数 {})", metadata.input_name, metadata.image_scale);
    tracing::info!("出力: {}", metadata.output_name);
    tracing::info!("クラスラベル: {}", metadata.class_labels.join(", "));
    tracing::info!("チャネル順序: {}", if metadata.is_bgr { "BGR" } else { "RGB" });
    tracing::info!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    tracing::info!("学習エポック数: {}", metadata.num_epochs);
    tracing::info!("学習日時: {}", metadata.trained_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::backbone::XceptionConfig;
    use crate::ml::ml_model::ModelConfig;

    fn sample_metadata() -> ModelMetadata {
        ModelMetadata::new(
            "CoinClassifier".to_string(),
            "image".to_string(),
            "output".to_string(),
            vec!["A".to_string(), "B".to_string()],
            1.0 / 255.0,
            false,
            ModelConfig::new(2, XceptionConfig::tiny()).with_image_size(32),
            1,
        )
    }

    #[test]
    fn test_save_and_load_package() {
        let dir = tempfile::tempdir().unwrap();
        let binary = vec![1u8, 2, 3, 4, 5];

        let saved = save_model_with_metadata(
            &dir.path().join("CoinClassifier.vision.tar.gz"),
            &sample_metadata(),
            &binary,
        )
        .unwrap();
        assert_eq!(saved, dir.path().join("CoinClassifier.vision.tar.gz"));

        let (metadata, loaded) = load_model_with_metadata(&saved).unwrap();
        assert_eq!(metadata.class_labels, vec!["A", "B"]);
        assert_eq!(loaded, binary);

        assert_eq!(load_metadata(&saved).unwrap().output_name, "output");
    }

    #[test]
    fn test_extension_is_added() {
        let dir = tempfile::tempdir().unwrap();
        let saved =
            save_model_with_metadata(&dir.path().join("model"), &sample_metadata(), &[0u8]).unwrap();
        assert_eq!(saved, dir.path().join("model.tar.gz"));
        assert!(saved.exists());
    }

    #[test]
    fn test_missing_archive_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_metadata(&dir.path().join("none.tar.gz")).is_err());
    }
}
