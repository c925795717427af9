//! ログ出力
//!
//! 実行ディレクトリごとに、標準出力と log.txt の両方へ同じログを書き出します。
//! 出力先はガードが生存している間だけ有効です（現在のスレッドのデフォルト購読者）。

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, Registry};

/// ログファイル名
pub const LOG_FILE_NAME: &str = "log.txt";

/// 文字列からログレベルを取得（不明な値は INFO）
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// 実行ディレクトリにひも付いたログ出力のガード
///
/// ドロップすると以前の出力先に戻ります。
pub struct RunLogGuard {
    _guard: DefaultGuard,
    log_path: PathBuf,
}

impl RunLogGuard {
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// 実行ディレクトリへのログ出力を開始
pub fn init_run_logging(run_dir: &Path, level: &str) -> Result<RunLogGuard> {
    let log_path = run_dir.join(LOG_FILE_NAME);
    let file = File::create(&log_path)
        .with_context(|| format!("Failed to create log file: {:?}", log_path))?;

    let stdout_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);
    let file_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    let subscriber = Registry::default()
        .with(parse_level(level))
        .with(stdout_layer)
        .with(file_layer);

    let guard = tracing::subscriber::set_default(subscriber);

    Ok(RunLogGuard {
        _guard: guard,
        log_path,
    })
}

/// プロセス全体の標準出力ログを初期化（実行ディレクトリの確定前に使用）
pub fn init_console_logging(level: &str) {
    // 既に初期化済みの場合は何もしない
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(parse_level(level))
        .try_init();
}
