//! Trend state from the deviation of the close against short and medium SMAs.

use serde::{Deserialize, Serialize};

use crate::{indicators, EngineError, Period, Result, Trend, OHLCV};

/// Classifies [`Trend`] from `(close - sma) / sma` over two SMA lengths.
///
/// Both deviations must exceed `strong_pct` for a strong trend and `weak_pct`
/// for a plain one; mixed signs are sideways.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendClassifier {
    pub short_period: Period,
    pub medium_period: Period,
    pub strong_pct: f64,
    pub weak_pct: f64,
}

impl Default for TrendClassifier {
    fn default() -> Self {
        Self {
            short_period: Period::new_const(20),
            medium_period: Period::new_const(50),
            strong_pct: 5.0,
            weak_pct: 2.0,
        }
    }
}

impl TrendClassifier {
    pub fn validate(&self) -> Result<()> {
        if !(self.weak_pct.is_finite() && self.strong_pct.is_finite()) {
            return Err(EngineError::InvalidValue("trend thresholds must be finite"));
        }
        if self.weak_pct < 0.0 || self.strong_pct < self.weak_pct {
            return Err(EngineError::InvalidConfig(format!(
                "trend: require 0 <= weak_pct ({}) <= strong_pct ({})",
                self.weak_pct, self.strong_pct
            )));
        }
        Ok(())
    }

    /// Classify from a close and the two moving-average values. Degenerate
    /// averages (non-finite or non-positive) read as sideways.
    pub fn classify(&self, close: f64, ma_short: f64, ma_medium: f64) -> Trend {
        let (Some(dev_short), Some(dev_medium)) = (
            indicators::pct_change(ma_short, close),
            indicators::pct_change(ma_medium, close),
        ) else {
            return Trend::Sideways;
        };

        if dev_short > self.strong_pct && dev_medium > self.strong_pct {
            Trend::StrongUp
        } else if dev_short > self.weak_pct && dev_medium > self.weak_pct {
            Trend::Up
        } else if dev_short < -self.strong_pct && dev_medium < -self.strong_pct {
            Trend::StrongDown
        } else if dev_short < -self.weak_pct && dev_medium < -self.weak_pct {
            Trend::Down
        } else {
            Trend::Sideways
        }
    }

    /// Trend at `index`, or `None` while the medium SMA is still warming up.
    pub fn classify_at<T: OHLCV>(&self, bars: &[T], index: usize) -> Option<Trend> {
        let close = bars.get(index)?.close();
        let short = indicators::sma_close_at(bars, index, self.short_period.get())?;
        let medium = indicators::sma_close_at(bars, index, self.medium_period.get())?;
        Some(self.classify(close, short, medium))
    }

    /// Trend for every bar; `Sideways` where history is insufficient.
    pub fn classify_series<T: OHLCV>(&self, bars: &[T]) -> Vec<Trend> {
        let closes = indicators::closes(bars);
        let short = indicators::sma(&closes, self.short_period.get());
        let medium = indicators::sma(&closes, self.medium_period.get());

        closes
            .iter()
            .zip(short.iter().zip(&medium))
            .map(|(&c, (&s, &m))| self.classify(c, s, m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deviation_bands() {
        let t = TrendClassifier::default();
        assert_eq!(t.classify(110.0, 100.0, 100.0), Trend::StrongUp);
        assert_eq!(t.classify(103.0, 100.0, 100.0), Trend::Up);
        assert_eq!(t.classify(101.0, 100.0, 100.0), Trend::Sideways);
        assert_eq!(t.classify(97.0, 100.0, 100.0), Trend::Down);
        assert_eq!(t.classify(90.0, 100.0, 100.0), Trend::StrongDown);
    }

    #[test]
    fn test_exactly_five_percent_is_not_strong() {
        let t = TrendClassifier::default();
        assert_eq!(t.classify(105.0, 100.0, 98.0), Trend::Up);
    }

    #[test]
    fn test_mixed_deviation_is_sideways() {
        let t = TrendClassifier::default();
        assert_eq!(t.classify(104.0, 100.0, 106.0), Trend::Sideways);
    }

    #[test]
    fn test_degenerate_average() {
        let t = TrendClassifier::default();
        assert_eq!(t.classify(100.0, f64::NAN, 100.0), Trend::Sideways);
        assert_eq!(t.classify(100.0, 0.0, 100.0), Trend::Sideways);
    }

    #[test]
    fn test_validate_thresholds() {
        let bad = TrendClassifier {
            strong_pct: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(TrendClassifier::default().validate().is_ok());
    }
}
