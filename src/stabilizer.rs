//! 連続フレームの予測ラベルの安定化
//!
//! 直近の予測を一定数保持し、同じラベルが十分な回数出現した場合のみ結果として採用します。

use std::collections::{HashMap, VecDeque};

use crate::money::{CoinTally, Money};

/// 直近の予測ラベルの履歴
#[derive(Debug, Clone)]
pub struct LabelHistory {
    history: VecDeque<Option<String>>,
    max_history: usize,
    required_count: usize,
}

impl Default for LabelHistory {
    fn default() -> Self {
        Self::new(3, 3)
    }
}

impl LabelHistory {
    /// `max_history` 件を保持し、`required_count` 回以上出現したラベルを採用する
    pub fn new(max_history: usize, required_count: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_history + 1),
            max_history,
            required_count,
        }
    }

    /// 予測を追加し、採用できるラベルがあれば返す
    ///
    /// `None` は確信度が低く採用されなかった予測です（件数には含まれ、集計には含まれません）。
    pub fn push(&mut self, label: Option<String>) -> Option<String> {
        self.history.push_back(label);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for label in self.history.iter().flatten() {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .filter(|(_, count)| *count >= self.required_count)
            .map(|(label, _)| label.to_string())
    }

    /// 結果を採用した後に履歴を消去する
    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// 連続フレームの予測から硬貨を数える
///
/// 安定したラベルが硬貨の場合だけ加算し、履歴を消去します。
/// 硬貨でないラベル（"dump" など）では履歴を保持したままです。
#[derive(Debug, Clone, Default)]
pub struct CoinCounter {
    history: LabelHistory,
    tally: CoinTally,
}

impl CoinCounter {
    pub fn new(history: LabelHistory) -> Self {
        Self {
            history,
            tally: CoinTally::new(),
        }
    }

    /// 1フレーム分の予測を追加し、新たに数えた硬貨を返す
    pub fn push_frame(&mut self, label: Option<String>) -> Option<Money> {
        let stable = self.history.push(label)?;
        let money = Money::parse(&stable)?;
        self.history.clear();
        self.tally.add(&money);
        Some(money)
    }

    pub fn tally(&self) -> &CoinTally {
        &self.tally
    }

    pub fn history(&self) -> &LabelHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(label: &str) -> Option<String> {
        Some(label.to_string())
    }

    #[test]
    fn test_accepts_after_three_agreeing_predictions() {
        let mut history = LabelHistory::default();
        assert_eq!(history.push(some("EUR1")), None);
        assert_eq!(history.push(some("EUR1")), None);
        assert_eq!(history.push(some("EUR1")), some("EUR1"));
    }

    #[test]
    fn test_window_slides() {
        let mut history = LabelHistory::default();
        history.push(some("EUR1"));
        history.push(some("EUR1"));
        assert_eq!(history.push(some("USD0.25")), None);
        assert_eq!(history.push(some("USD0.25")), None);
        assert_eq!(history.push(some("USD0.25")), some("USD0.25"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_missing_predictions_break_agreement() {
        let mut history = LabelHistory::default();
        history.push(some("EUR2"));
        history.push(None);
        assert_eq!(history.push(some("EUR2")), None);
        assert_eq!(history.push(some("EUR2")), None);
        assert_eq!(history.push(some("EUR2")), some("EUR2"));
    }

    #[test]
    fn test_clear_resets() {
        let mut history = LabelHistory::default();
        for _ in 0..3 {
            history.push(some("dump"));
        }
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.push(some("dump")), None);
    }

    #[test]
    fn test_counter_counts_stable_coins() {
        let mut counter = CoinCounter::default();
        assert!(counter.push_frame(some("EUR1")).is_none());
        assert!(counter.push_frame(some("EUR1")).is_none());
        let coin = counter.push_frame(some("EUR1")).unwrap();
        assert_eq!(coin.id, "EUR1");
        assert!(counter.history().is_empty());
        assert_eq!(counter.tally().coins(), 1);
    }

    #[test]
    fn test_counter_keeps_history_for_non_coin_labels() {
        let mut counter = CoinCounter::default();
        for _ in 0..3 {
            assert!(counter.push_frame(some("dump")).is_none());
        }
        assert_eq!(counter.history().len(), 3);
        assert_eq!(counter.tally().coins(), 0);

        // 窓が埋まったままでも硬貨が揃えば数える
        counter.push_frame(some("USD0.25"));
        counter.push_frame(some("USD0.25"));
        assert_eq!(counter.push_frame(some("USD0.25")).unwrap().id, "USD0.25");
        assert_eq!(counter.tally().coins(), 1);
    }
}
