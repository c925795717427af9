//! 画像分類パッケージを使って硬貨画像を分類するツール
//!
//! 使い方: classify [--cpu] [--frames] [--rates <exchangeRates.json> --to <通貨>] <package.tar.gz> <画像>...
//!
//! `--frames` を指定すると画像を連続フレームとして扱い、同じ硬貨が3回続けて認識された時点で1枚と数えます。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use coin_classifier_lib::backend::AnyInferenceEngine;
use coin_classifier_lib::logging::init_console_logging;
use coin_classifier_lib::money::{CoinTally, ExchangeRates, Money};
use coin_classifier_lib::stabilizer::CoinCounter;
use coin_classifier_lib::DeviceType;

struct Args {
    device_type: DeviceType,
    frames: bool,
    rates: Option<PathBuf>,
    target_currency: Option<String>,
    package: PathBuf,
    images: Vec<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut device_type = DeviceType::Wgpu;
    let mut frames = false;
    let mut rates = None;
    let mut target_currency = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cpu" => device_type = DeviceType::Cpu,
            "--frames" => frames = true,
            "--rates" => {
                let path = args.next().ok_or_else(|| anyhow::anyhow!("--rates にはパスが必要です"))?;
                rates = Some(PathBuf::from(path));
            }
            "--to" => {
                let currency = args.next().ok_or_else(|| anyhow::anyhow!("--to には通貨コードが必要です"))?;
                target_currency = Some(currency);
            }
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    if positional.len() < 2 {
        anyhow::bail!(
            "使い方: classify [--cpu] [--frames] [--rates <exchangeRates.json> --to <通貨>] <package.tar.gz> <画像>..."
        );
    }
    if rates.is_some() != target_currency.is_some() {
        anyhow::bail!("--rates と --to は両方指定してください");
    }
    let package = positional.remove(0);

    Ok(Args {
        device_type,
        frames,
        rates,
        target_currency,
        package,
        images: positional,
    })
}

fn run() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    let engine = AnyInferenceEngine::load(&args.package, args.device_type)?;
    engine.config().display();

    let mut tally = CoinTally::new();
    let mut counter = CoinCounter::default();

    for path in &args.images {
        let prediction = engine.classify_image(path)?;
        let accepted = engine.config().is_confident(prediction.confidence);

        let money = Money::parse(&prediction.label);
        let shown = match money {
            Some(ref money) => money.localized(),
            None => prediction.label.clone(),
        };
        println!(
            "{}: {} ({:.1}%){}",
            path.display(),
            shown,
            prediction.confidence * 100.0,
            if accepted { "" } else { " [低確信度]" }
        );

        if args.frames {
            let label = accepted.then(|| prediction.label.clone());
            if let Some(coin) = counter.push_frame(label) {
                println!("  -> 認識: {}", coin.localized());
            }
        } else if accepted {
            if let Some(ref money) = money {
                tally.add(money);
            }
        }
    }

    if args.frames {
        tally = counter.tally().clone();
    }

    println!("\n=== 合計 ({} 枚) ===", tally.coins());
    for line in tally.localized_totals() {
        println!("  {}", line);
    }

    if let (Some(rates_path), Some(target)) = (&args.rates, &args.target_currency) {
        let rates = ExchangeRates::load(rates_path)?;
        match tally.total_in(target, &rates) {
            Some(total) => println!("  換算合計 ({}): {:.2}", target, total),
            None => println!("  換算できない通貨が含まれています ({})", rates.date),
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    init_console_logging("info");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let args = parse(&["--cpu", "--frames", "model.tar.gz", "a.png", "b.png"]).unwrap();
        assert_eq!(args.device_type, DeviceType::Cpu);
        assert!(args.frames);
        assert_eq!(args.package, PathBuf::from("model.tar.gz"));
        assert_eq!(args.images.len(), 2);
        assert!(args.rates.is_none());
    }

    #[test]
    fn test_rates_and_target_currency() {
        let args = parse(&["--rates", "rates.json", "--to", "USD", "m.tar.gz", "a.png"]).unwrap();
        assert_eq!(args.rates, Some(PathBuf::from("rates.json")));
        assert_eq!(args.target_currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_rates_without_target_is_error() {
        assert!(parse(&["--rates", "rates.json", "m.tar.gz", "a.png"]).is_err());
        assert!(parse(&["--to", "USD", "m.tar.gz", "a.png"]).is_err());
    }

    #[test]
    fn test_missing_images_is_error() {
        assert!(parse(&["m.tar.gz"]).is_err());
        assert!(parse(&["--rates"]).is_err());
    }
}
