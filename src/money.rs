//! 硬貨ラベルと通貨換算
//!
//! クラスラベルは `<通貨コード3文字><金額>` の形式です（例: "EUR0.05", "USD0.25"）。
//! この形式に当てはまらないラベル（"dump" など）は硬貨ではありません。

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 硬貨1枚
#[derive(Debug, Clone, PartialEq)]
pub struct Money {
    pub id: String,
    pub currency: String,
    pub amount: f64,
}

impl Money {
    /// ラベルを通貨コードと金額に分解する
    pub fn parse(id: &str) -> Option<Self> {
        let currency = id.get(..3)?;
        if !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let amount: f64 = id.get(3..)?.parse().ok()?;
        if !amount.is_finite() {
            return None;
        }

        Some(Self {
            id: id.to_string(),
            currency: currency.to_string(),
            amount,
        })
    }

    /// "<通貨記号> <金額(小数2桁)>"
    pub fn localized(&self) -> String {
        format_amount(&self.currency, self.amount)
    }

    /// 指定通貨に換算した金額
    pub fn exchanged(&self, to: &str, rates: &ExchangeRates) -> Option<f64> {
        rates.exchange(self.amount, &self.currency, to)
    }

    /// 指定通貨に換算して表示用文字列にする
    pub fn exchanged_localized(&self, to: &str, rates: &ExchangeRates) -> Option<String> {
        self.exchanged(to, rates).map(|amount| format_amount(to, amount))
    }
}

/// 通貨コードに対応する記号（未知の通貨はコードそのもの）
pub fn currency_symbol(currency: &str) -> &str {
    match currency {
        "EUR" => "€",
        "USD" => "$",
        "AUD" => "A$",
        "NZD" => "NZ$",
        "CAD" => "CA$",
        "GBP" => "£",
        "JPY" => "¥",
        "CHF" => "CHF",
        _ => currency,
    }
}

fn format_amount(currency: &str, amount: f64) -> String {
    format!("{} {:.2}", currency_symbol(currency), amount)
}

/// 為替レート（基準通貨 1 単位あたりの各通貨の量）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub base: String,
    pub date: String,
    pub rates: BTreeMap<String, f64>,
}

impl ExchangeRates {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read exchange rates: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to deserialize exchange rates")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write exchange rates: {:?}", path))
    }

    /// 金額を換算する（未知の通貨は None）
    pub fn exchange(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(amount);
        }

        if from == self.base {
            let to_rate = self.rates.get(to)?;
            Some(amount * to_rate)
        } else if to == self.base {
            let from_rate = self.rates.get(from)?;
            Some(amount / from_rate)
        } else {
            let from_rate = self.rates.get(from)?;
            let to_rate = self.rates.get(to)?;
            Some(to_rate / from_rate * amount)
        }
    }
}

/// 認識した硬貨の通貨ごとの合計
#[derive(Debug, Clone, Default)]
pub struct CoinTally {
    totals: BTreeMap<String, f64>,
    coins: usize,
}

impl CoinTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// ラベルを加算する（硬貨でないラベルは無視して false を返す）
    pub fn add_label(&mut self, label: &str) -> bool {
        match Money::parse(label) {
            Some(money) => {
                self.add(&money);
                true
            }
            None => false,
        }
    }

    pub fn add(&mut self, money: &Money) {
        *self.totals.entry(money.currency.clone()).or_insert(0.0) += money.amount;
        self.coins += 1;
    }

    pub fn coins(&self) -> usize {
        self.coins
    }

    /// 通貨コード -> 合計金額
    pub fn totals(&self) -> &BTreeMap<String, f64> {
        &self.totals
    }

    /// 全通貨を指定通貨に換算した合計（換算できない通貨があれば None）
    pub fn total_in(&self, to: &str, rates: &ExchangeRates) -> Option<f64> {
        self.totals
            .iter()
            .map(|(currency, amount)| rates.exchange(*amount, currency, to))
            .sum()
    }

    /// 通貨ごとの合計を表示用文字列にする
    pub fn localized_totals(&self) -> Vec<String> {
        self.totals
            .iter()
            .map(|(currency, amount)| format_amount(currency, *amount))
            .collect()
    }
}
