//! Cross-sectional relative-strength rating.
//!
//! Phase one maps every instrument to a weighted multi-period return series.
//! Phase two ranks the scores per date across the instruments that have a
//! full history on that date.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{indicators, table::CloseTable, EngineError, Result};

/// One instrument's rating on one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsRatingRecord {
    pub symbol: String,
    pub date: NaiveDate,
    /// Weighted return in percent
    pub rs_score: f64,
    /// Percentile rating 1..=99
    pub rs_rating: u8,
}

/// Weighted-return percentile rater
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelativeStrengthRater {
    /// (lookback sessions, weight)
    pub horizons: Vec<(usize, f64)>,
}

impl Default for RelativeStrengthRater {
    fn default() -> Self {
        Self {
            horizons: vec![(63, 0.4), (126, 0.2), (189, 0.2), (252, 0.2)],
        }
    }
}

impl RelativeStrengthRater {
    pub fn validate(&self) -> Result<()> {
        if self.horizons.is_empty() {
            return Err(EngineError::InvalidConfig("strength: no horizons".into()));
        }
        if self.horizons.iter().any(|&(n, w)| n == 0 || !w.is_finite()) {
            return Err(EngineError::InvalidConfig(
                "strength: horizons need a positive lookback and finite weight".into(),
            ));
        }
        Ok(())
    }

    /// Longest lookback; instruments need this many prior sessions to be rated.
    pub fn required_history(&self) -> usize {
        self.horizons.iter().map(|&(n, _)| n).max().unwrap_or(0)
    }

    /// Weighted return at `t`, `None` without a finite close at every lookback.
    pub fn score_at(&self, closes: &[f64], t: usize) -> Option<f64> {
        let now = *closes.get(t)?;
        self.horizons.iter().try_fold(0.0, |acc, &(n, w)| {
            let then = *closes.get(t.checked_sub(n)?)?;
            indicators::pct_change(then, now).map(|r| acc + w * r)
        })
    }

    /// Score for every date; `NaN` where undefined.
    pub fn score_series(&self, closes: &[f64]) -> Vec<f64> {
        (0..closes.len())
            .map(|t| self.score_at(closes, t).unwrap_or(f64::NAN))
            .collect()
    }

    /// Rate every instrument of `table` on every date.
    pub fn rate(&self, table: &CloseTable) -> RsRatingTable {
        let columns: Vec<(&str, &[f64])> = table.iter().collect();

        // Phase 1: per-instrument scores
        let scores: Vec<Vec<f64>> = columns
            .par_iter()
            .map(|(_, closes)| self.score_series(closes))
            .collect();

        // Phase 2: per-date ranking
        let per_date: Vec<Vec<Option<u8>>> = (0..table.len())
            .into_par_iter()
            .map(|t| {
                let day: Vec<f64> = scores.iter().map(|s| s[t]).collect();
                percentile_ratings(&day)
            })
            .collect();

        let unrated = scores
            .iter()
            .filter(|s| s.last().map_or(true, |v| !v.is_finite()))
            .count();
        if unrated > 0 {
            tracing::debug!(
                unrated,
                need = self.required_history(),
                "instruments without a full history on the last date"
            );
        }

        let mut ratings = BTreeMap::new();
        let mut score_map = BTreeMap::new();
        for (i, ((symbol, _), series)) in columns.iter().zip(scores).enumerate() {
            let column: Vec<Option<u8>> = per_date.iter().map(|day| day[i]).collect();
            ratings.insert(symbol.to_string(), column);
            score_map.insert(symbol.to_string(), series);
        }

        RsRatingTable {
            dates: table.dates().to_vec(),
            scores: score_map,
            ratings,
        }
    }
}

/// Ratings 1..=99 for the finite entries of `scores` (average rank for ties).
/// Non-finite entries are not rated.
pub fn percentile_ratings(scores: &[f64]) -> Vec<Option<u8>> {
    let mut ranked: Vec<(usize, f64)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    let n = ranked.len();
    let mut out = vec![None; scores.len()];
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && ranked[end + 1].1 == ranked[start].1 {
            end += 1;
        }
        // 1-based ranks start+1 ..= end+1
        let avg_rank = (start + end) as f64 / 2.0 + 1.0;
        let rating = (avg_rank / n as f64 * 98.0 + 1.0).round().clamp(1.0, 99.0) as u8;
        for &(idx, _) in &ranked[start..=end] {
            out[idx] = Some(rating);
        }
        start = end + 1;
    }
    out
}

/// Ratings and scores for every (symbol, date) of a close table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RsRatingTable {
    dates: Vec<NaiveDate>,
    scores: BTreeMap<String, Vec<f64>>,
    ratings: BTreeMap<String, Vec<Option<u8>>>,
}

impl RsRatingTable {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    pub fn rating(&self, symbol: &str, date: NaiveDate) -> Option<u8> {
        let t = self.index_of(date)?;
        self.ratings.get(symbol)?.get(t).copied().flatten()
    }

    pub fn score(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        let t = self.index_of(date)?;
        self.scores
            .get(symbol)?
            .get(t)
            .copied()
            .filter(|v| v.is_finite())
    }

    /// Rating change over `lag` sessions ending at `date`.
    pub fn rating_delta(&self, symbol: &str, date: NaiveDate, lag: usize) -> Option<i32> {
        let t = self.index_of(date)?;
        let column = self.ratings.get(symbol)?;
        let now = (*column.get(t)?)?;
        let then = (*column.get(t.checked_sub(lag)?)?)?;
        Some(now as i32 - then as i32)
    }

    /// Every rated instrument on `date`, best first.
    pub fn records_on(&self, date: NaiveDate) -> Vec<RsRatingRecord> {
        let mut records: Vec<RsRatingRecord> = self
            .ratings
            .keys()
            .filter_map(|symbol| self.record(symbol, date))
            .collect();
        records.sort_by(|a, b| b.rs_score.total_cmp(&a.rs_score));
        records
    }

    pub fn record(&self, symbol: &str, date: NaiveDate) -> Option<RsRatingRecord> {
        Some(RsRatingRecord {
            symbol: symbol.to_string(),
            date,
            rs_score: self.score(symbol, date)?,
            rs_rating: self.rating(symbol, date)?,
        })
    }

    /// Most recent rating of `symbol`.
    pub fn latest(&self, symbol: &str) -> Option<RsRatingRecord> {
        self.dates
            .iter()
            .rev()
            .find_map(|&date| self.record(symbol, date))
    }
}
