//! コイン分類モデルの学習とエクスポート
//!
//! 使い方: coin_classifier [設定ファイル]

use std::path::PathBuf;
use std::process::ExitCode;

use coin_classifier_lib::PipelineConfig;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let config_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PipelineConfig::default_path()
    };

    match coin_classifier_lib::run(&config_path) {
        Ok(outcome) => {
            println!("学習完了: {}", outcome.run_dir.path.display());
            println!("  チェックポイント: {}", outcome.checkpoint.display());
            println!("  画像分類パッケージ: {}", outcome.vision_package.display());
            println!("  軽量モデル: {}", outcome.lite_model.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("エラー: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
