//! Date-aligned close table for cross-sectional work, and group membership.

use std::{collections::BTreeMap, path::Path};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

// ============================================================
// CLOSE TABLE
// ============================================================

/// Closes keyed by (date, symbol). Every column has one value per date;
/// missing sessions hold `NaN`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseTable {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl CloseTable {
    /// Empty table over `dates`, which must be strictly increasing.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self> {
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::InvalidValue("dates must be strictly increasing"));
        }
        Ok(Self {
            dates,
            columns: BTreeMap::new(),
        })
    }

    /// Add or replace one symbol's closes.
    pub fn insert(&mut self, symbol: impl Into<String>, closes: Vec<f64>) -> Result<()> {
        if closes.len() != self.dates.len() {
            return Err(EngineError::LengthMismatch {
                what: "close column",
                expected: self.dates.len(),
                got: closes.len(),
            });
        }
        self.columns.insert(symbol.into(), closes);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_column(mut self, symbol: impl Into<String>, closes: Vec<f64>) -> Result<Self> {
        self.insert(symbol, closes)?;
        Ok(self)
    }

    #[inline]
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn symbol_count(&self) -> usize {
        self.columns.len()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn get(&self, symbol: &str) -> Option<&[f64]> {
        self.columns.get(symbol).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns.iter().map(|(s, c)| (s.as_str(), c.as_slice()))
    }

    pub fn date_index(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Equal-weight index of `members`, chained from `base` on the first date
    /// any member has a close. Each step averages the daily returns of the
    /// members with closes on both days; a day with none carries forward.
    pub fn group_index(&self, members: &[String], base: f64) -> Vec<f64> {
        let columns: Vec<&[f64]> = members.iter().filter_map(|m| self.get(m)).collect();
        let mut out = vec![f64::NAN; self.len()];
        let mut level: Option<f64> = None;

        for t in 0..self.len() {
            level = match level {
                None => columns.iter().any(|c| c[t].is_finite()).then_some(base),
                Some(prev) => {
                    let (sum, n) = columns
                        .iter()
                        .filter(|c| c[t - 1].is_finite() && c[t].is_finite() && c[t - 1] > 0.0)
                        .fold((0.0, 0usize), |(s, n), c| (s + c[t] / c[t - 1] - 1.0, n + 1));
                    Some(if n > 0 { prev * (1.0 + sum / n as f64) } else { prev })
                }
            };
            if let Some(v) = level {
                out[t] = v;
            }
        }
        out
    }

    /// Table with one equal-weight index column per group of `membership`.
    pub fn group_table(&self, membership: &Membership) -> Result<CloseTable> {
        let mut table = CloseTable {
            dates: self.dates.clone(),
            columns: BTreeMap::new(),
        };
        for (group, members) in membership.iter() {
            let missing = members.iter().filter(|m| self.get(m).is_none()).count();
            if missing > 0 {
                tracing::debug!(group, missing, "group members without closes");
            }
            table.insert(group, self.group_index(members, 100.0))?;
        }
        Ok(table)
    }
}

// ============================================================
// MEMBERSHIP
// ============================================================

/// Instrument grouping (sector → member symbols).
///
/// ```toml
/// [groups]
/// Technology = ["AAPL", "MSFT"]
/// Energy = ["XOM", "CVX"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Membership {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidConfig(format!("read membership file: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EngineError::InvalidConfig(format!("parse membership TOML: {e}")))
    }

    pub fn insert(&mut self, group: impl Into<String>, members: Vec<String>) {
        self.groups.insert(group.into(), members);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups.iter().map(|(g, m)| (g.as_str(), m.as_slice()))
    }

    pub fn members(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    /// First group (by name) containing `symbol`.
    pub fn group_of(&self, symbol: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == symbol))
            .map(|(g, _)| g.as_str())
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    pub fn instrument_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n as u64).map(|i| start + chrono::Days::new(i)).collect()
    }

    #[test]
    fn test_insert_length_checked() {
        let mut t = CloseTable::new(dates(3)).unwrap();
        assert!(t.insert("A", vec![1.0, 2.0, 3.0]).is_ok());
        assert_eq!(
            t.insert("B", vec![1.0]),
            Err(EngineError::LengthMismatch {
                what: "close column",
                expected: 3,
                got: 1
            })
        );
        assert_eq!(t.symbol_count(), 1);
    }

    #[test]
    fn test_unsorted_dates_rejected() {
        let mut d = dates(3);
        d.swap(0, 2);
        assert!(CloseTable::new(d).is_err());
    }

    #[test]
    fn test_date_index() {
        let d = dates(5);
        let t = CloseTable::new(d.clone()).unwrap();
        assert_eq!(t.date_index(d[3]), Some(3));
        assert_eq!(t.date_index(d[4] + chrono::Days::new(1)), None);
    }

    #[test]
    fn test_group_index_equal_weight() {
        let t = CloseTable::new(dates(3))
            .unwrap()
            .with_column("A", vec![10.0, 11.0, 11.0])
            .unwrap()
            .with_column("B", vec![20.0, 18.0, f64::NAN])
            .unwrap();
        let idx = t.group_index(&["A".into(), "B".into()], 100.0);
        assert_eq!(idx[0], 100.0);
        // (+10% + -10%) / 2
        assert!((idx[1] - 100.0).abs() < 1e-9);
        // only A contributes, flat
        assert!((idx[2] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_group_index_late_start() {
        let t = CloseTable::new(dates(3))
            .unwrap()
            .with_column("A", vec![f64::NAN, 10.0, 12.0])
            .unwrap();
        let idx = t.group_index(&["A".into()], 100.0);
        assert!(idx[0].is_nan());
        assert_eq!(idx[1], 100.0);
        assert!((idx[2] - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_membership_from_toml() {
        let m = Membership::from_toml(
            r#"
            [groups]
            Technology = ["AAPL", "MSFT"]
            Energy = ["XOM"]
            "#,
        )
        .unwrap();
        assert_eq!(m.instrument_count(), 3);
        assert_eq!(m.group_of("XOM"), Some("Energy"));
        assert_eq!(m.group_names(), vec!["Energy", "Technology"]);
        assert!(Membership::from_toml("groups = 3").is_err());
    }

    #[test]
    fn test_group_table() {
        let mut m = Membership::default();
        m.insert("Tech", vec!["A".into()]);
        let t = CloseTable::new(dates(2))
            .unwrap()
            .with_column("A", vec![10.0, 11.0])
            .unwrap();
        let g = t.group_table(&m).unwrap();
        let col = g.get("Tech").unwrap();
        assert!((col[1] - 110.0).abs() < 1e-9);
    }
}
