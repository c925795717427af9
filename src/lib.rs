#![recursion_limit = "256"]

// 学習パイプライン
pub mod backend;
pub mod logging;
pub mod pipeline;
pub mod run_dir;

// モデル・データ
pub mod ml;
pub mod model;

// 推論結果の利用
pub mod money;
pub mod stabilizer;

use std::path::Path;

pub use model::config::{DeviceType, PipelineConfig};
pub use pipeline::PipelineOutcome;

/// 設定ファイルを読み込んでパイプラインを実行
///
/// 設定ファイルが存在しない場合はデフォルト設定で実行します。
pub fn run(config_path: &Path) -> anyhow::Result<PipelineOutcome> {
    let config = PipelineConfig::load_or_default(config_path)?;
    logging::init_console_logging(&config.log_level);

    if config_path.exists() {
        tracing::info!("設定ファイル: {}", config_path.display());
    } else {
        tracing::info!("設定ファイルがないためデフォルト設定を使用します: {}", config_path.display());
    }

    backend::run_pipeline(&config)
}
