//! Market breadth regime, health score, exposure and the breadth signal
//! matrix.
//!
//! Everything here is a pure function of a trailing window of
//! [`BreadthSnapshot`]s, latest last. Re-running over history reproduces the
//! same [`MarketState`] for every date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    bottom::{BottomFormationStateMachine, BottomStage},
    indicators, EngineError, Result,
};

// ============================================================
// TYPES
// ============================================================

/// Market-wide breadth statistics for one date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreadthSnapshot {
    pub date: NaiveDate,
    /// Percent of the universe above its 20-day MA
    pub pct_above_ma20: f64,
    pub pct_above_ma50: f64,
    pub pct_above_ma100: f64,
    /// Short EMA of the benchmark close (EMA9 by default)
    pub ema_short: f64,
    /// Long EMA of the benchmark close (EMA21 by default)
    pub ema_long: f64,
    #[serde(default)]
    pub advance_decline: Option<f64>,
}

impl BreadthSnapshot {
    pub fn new(date: NaiveDate, ma20: f64, ma50: f64, ma100: f64) -> Self {
        Self {
            date,
            pct_above_ma20: ma20,
            pct_above_ma50: ma50,
            pct_above_ma100: ma100,
            ema_short: f64::NAN,
            ema_long: f64::NAN,
            advance_decline: None,
        }
    }

    pub fn with_emas(mut self, ema_short: f64, ema_long: f64) -> Self {
        self.ema_short = ema_short;
        self.ema_long = ema_long;
        self
    }

    /// Largest of the three breadth percentages
    #[inline]
    pub fn max_pct(&self) -> f64 {
        self.pct_above_ma20
            .max(self.pct_above_ma50)
            .max(self.pct_above_ma100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Bullish,
    Neutral,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthBand {
    Healthy,
    Caution,
    Bearish,
}

impl HealthBand {
    #[inline]
    pub fn from_score(score: f64) -> Self {
        if score >= 60.0 {
            HealthBand::Healthy
        } else if score >= 40.0 {
            HealthBand::Caution
        } else {
            HealthBand::Bearish
        }
    }
}

/// Breadth signal, one per date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketSignal {
    StrongBuy,
    Buy,
    Hold,
    Warning,
    Sell,
    Danger,
    Accumulating,
    EarlyBuy,
    Wait,
}

/// Classifier output for one date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub date: NaiveDate,
    pub regime: Regime,
    pub health_score: f64,
    pub health_band: HealthBand,
    pub uptrend_confirmed: bool,
    /// One of 0, 20, 40, 60, 80, 100
    pub exposure_pct: u8,
    pub signal: MarketSignal,
    pub bottom_stage: Option<BottomStage>,
}

// ============================================================
// HELPERS
// ============================================================

/// `min(last window) > min(previous window)` over the tail of `series`.
///
/// Needs `2 * window` finite values at the end of the series; anything less
/// is not a higher low.
pub fn higher_low(series: &[f64], window: usize) -> bool {
    if window == 0 || series.len() < 2 * window {
        return false;
    }
    let tail = &series[series.len() - 2 * window..];
    if tail.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let (previous, last) = tail.split_at(window);
    let min = |s: &[f64]| s.iter().copied().fold(f64::INFINITY, f64::min);
    min(last) > min(previous)
}

/// Short and long EMAs of a benchmark close series (EMA9/EMA21 by default).
pub fn benchmark_emas(closes: &[f64], short: usize, long: usize) -> (Vec<f64>, Vec<f64>) {
    (indicators::ema(closes, short), indicators::ema(closes, long))
}

/// Fill `ema_short`/`ema_long` of every snapshot from aligned benchmark closes.
pub fn attach_benchmark_emas(
    snapshots: &mut [BreadthSnapshot],
    closes: &[f64],
    short: usize,
    long: usize,
) -> Result<()> {
    if closes.len() != snapshots.len() {
        return Err(EngineError::LengthMismatch {
            what: "benchmark closes",
            expected: snapshots.len(),
            got: closes.len(),
        });
    }
    let (fast, slow) = benchmark_emas(closes, short, long);
    for ((snap, s), l) in snapshots.iter_mut().zip(fast).zip(slow) {
        snap.ema_short = s;
        snap.ema_long = l;
    }
    Ok(())
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreadthRegimeDetector {
    /// Fractional band around the long EMA treated as neutral
    pub ema_margin: f64,
    pub higher_low_window_ma20: usize,
    pub higher_low_window_ma50: usize,
    pub bottom: BottomFormationStateMachine,
}

impl Default for BreadthRegimeDetector {
    fn default() -> Self {
        Self {
            ema_margin: 0.005,
            higher_low_window_ma20: 7,
            higher_low_window_ma50: 9,
            bottom: BottomFormationStateMachine::default(),
        }
    }
}

/// `ma50` breakpoints, highest first, and the exposure they map to
const EXPOSURE_STEPS: [(f64, u8); 5] = [(70.0, 100), (55.0, 80), (40.0, 60), (25.0, 40), (0.0, 20)];

impl BreadthRegimeDetector {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..0.5).contains(&self.ema_margin) {
            return Err(EngineError::OutOfRange {
                field: "ema_margin",
                value: self.ema_margin,
                min: 0.0,
                max: 0.5,
            });
        }
        if self.higher_low_window_ma20 == 0 || self.higher_low_window_ma50 == 0 {
            return Err(EngineError::InvalidValue("higher-low windows must be > 0"));
        }
        self.bottom.validate()
    }

    /// Regime from the benchmark EMAs. Errors when either EMA is unusable.
    pub fn regime(&self, snap: &BreadthSnapshot) -> Result<Regime> {
        let (fast, slow) = (snap.ema_short, snap.ema_long);
        if !(fast.is_finite() && slow.is_finite() && fast > 0.0 && slow > 0.0) {
            return Err(EngineError::MissingBenchmark { date: snap.date });
        }
        Ok(if fast > slow * (1.0 + self.ema_margin) {
            Regime::Bullish
        } else if fast < slow * (1.0 - self.ema_margin) {
            Regime::Bearish
        } else {
            Regime::Neutral
        })
    }

    #[inline]
    pub fn health_score(snap: &BreadthSnapshot) -> f64 {
        0.5 * snap.pct_above_ma50 + 0.3 * snap.pct_above_ma20 + 0.2 * snap.pct_above_ma100
    }

    #[inline]
    pub fn uptrend_confirmed(snap: &BreadthSnapshot) -> bool {
        snap.pct_above_ma50 >= 50.0 && snap.pct_above_ma100 >= 50.0
    }

    /// Exposure percent; always 0 in a bearish regime.
    pub fn exposure(regime: Regime, pct_above_ma50: f64) -> u8 {
        if regime == Regime::Bearish {
            return 0;
        }
        EXPOSURE_STEPS
            .iter()
            .find(|(floor, _)| pct_above_ma50 >= *floor)
            .map_or(20, |&(_, pct)| pct)
    }

    /// Breadth signal for the latest snapshot of `history`.
    pub fn signal(&self, history: &[BreadthSnapshot]) -> Option<MarketSignal> {
        let snap = history.last()?;
        let (ma20, ma50) = (snap.pct_above_ma20, snap.pct_above_ma50);

        if Self::uptrend_confirmed(snap) {
            return Some(if ma20 < 20.0 {
                MarketSignal::StrongBuy
            } else if ma20 < 40.0 {
                MarketSignal::Buy
            } else if ma20 > 80.0 {
                MarketSignal::Warning
            } else {
                MarketSignal::Hold
            });
        }

        let ma20_series: Vec<f64> = history.iter().map(|s| s.pct_above_ma20).collect();
        let ma50_series: Vec<f64> = history.iter().map(|s| s.pct_above_ma50).collect();
        let hl20 = higher_low(&ma20_series, self.higher_low_window_ma20);

        Some(if ma20 > 70.0 {
            MarketSignal::Sell
        } else if ma50 < 30.0 && ma20 < 20.0 && !hl20 {
            MarketSignal::Danger
        } else if snap.max_pct() < 30.0 && hl20 {
            MarketSignal::Accumulating
        } else if ma20 >= 25.0 && hl20 && higher_low(&ma50_series, self.higher_low_window_ma50) {
            MarketSignal::EarlyBuy
        } else {
            MarketSignal::Wait
        })
    }

    /// Market state for the latest snapshot of `history`.
    pub fn detect(&self, history: &[BreadthSnapshot]) -> Result<MarketState> {
        let snap = history
            .last()
            .ok_or(EngineError::InsufficientHistory { need: 1, got: 0 })?;
        let regime = self.regime(snap)?;
        let health_score = Self::health_score(snap);
        let signal = self.signal(history).unwrap_or(MarketSignal::Wait);

        let state = MarketState {
            date: snap.date,
            regime,
            health_score,
            health_band: HealthBand::from_score(health_score),
            uptrend_confirmed: Self::uptrend_confirmed(snap),
            exposure_pct: Self::exposure(regime, snap.pct_above_ma50),
            signal,
            bottom_stage: self.bottom.stage(history),
        };
        tracing::trace!(date = %state.date, regime = ?state.regime, signal = ?state.signal, "market state");
        Ok(state)
    }

    /// Market state for every date of `history`, each computed from the
    /// trailing window ending on that date. Failures stay local to their date.
    pub fn detect_series(&self, history: &[BreadthSnapshot]) -> Vec<Result<MarketState>> {
        (1..=history.len())
            .map(|end| {
                let result = self.detect(&history[..end]);
                if let Err(ref e) = result {
                    tracing::warn!(date = %history[end - 1].date, "market state skipped: {e}");
                }
                result
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(i: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap() + chrono::Days::new(i)
    }

    fn snap(i: u64, ma20: f64, ma50: f64, ma100: f64) -> BreadthSnapshot {
        BreadthSnapshot::new(day(i), ma20, ma50, ma100).with_emas(101.0, 100.0)
    }

    #[test]
    fn test_regime_margin() {
        let d = BreadthRegimeDetector::default();
        let s = snap(0, 50.0, 50.0, 50.0);
        assert_eq!(d.regime(&s.with_emas(100.6, 100.0)).unwrap(), Regime::Bullish);
        assert_eq!(d.regime(&s.with_emas(100.4, 100.0)).unwrap(), Regime::Neutral);
        assert_eq!(d.regime(&s.with_emas(99.6, 100.0)).unwrap(), Regime::Neutral);
        assert_eq!(d.regime(&s.with_emas(99.4, 100.0)).unwrap(), Regime::Bearish);
    }

    #[test]
    fn test_missing_benchmark() {
        let d = BreadthRegimeDetector::default();
        let s = BreadthSnapshot::new(day(0), 50.0, 50.0, 50.0);
        assert_eq!(
            d.regime(&s),
            Err(EngineError::MissingBenchmark { date: day(0) })
        );
    }

    #[test]
    fn test_health_bands() {
        let s = snap(0, 50.0, 70.0, 60.0);
        let h = BreadthRegimeDetector::health_score(&s);
        assert!((h - 62.0).abs() < 1e-9);
        assert_eq!(HealthBand::from_score(h), HealthBand::Healthy);
        assert_eq!(HealthBand::from_score(59.9), HealthBand::Caution);
        assert_eq!(HealthBand::from_score(39.9), HealthBand::Bearish);
    }

    #[test]
    fn test_exposure_breakpoints() {
        use BreadthRegimeDetector as D;
        assert_eq!(D::exposure(Regime::Bullish, 70.0), 100);
        assert_eq!(D::exposure(Regime::Bullish, 69.9), 80);
        assert_eq!(D::exposure(Regime::Neutral, 55.0), 80);
        assert_eq!(D::exposure(Regime::Neutral, 40.0), 60);
        assert_eq!(D::exposure(Regime::Bullish, 25.0), 40);
        assert_eq!(D::exposure(Regime::Bullish, 3.0), 20);
        assert_eq!(D::exposure(Regime::Bearish, 95.0), 0);
    }

    #[test]
    fn test_higher_low() {
        let s = [5.0, 3.0, 4.0, 6.0, 4.0, 5.0];
        assert!(higher_low(&s, 3));
        assert!(!higher_low(&s[1..], 3));
        let lower = [5.0, 3.0, 4.0, 6.0, 2.0, 5.0];
        assert!(!higher_low(&lower, 3));
        assert!(!higher_low(&[1.0, f64::NAN, 2.0, 3.0], 2));
    }

    #[test]
    fn test_uptrend_signals() {
        let d = BreadthRegimeDetector::default();
        let sig = |ma20| d.signal(&[snap(0, ma20, 60.0, 55.0)]).unwrap();
        assert_eq!(sig(15.0), MarketSignal::StrongBuy);
        assert_eq!(sig(30.0), MarketSignal::Buy);
        assert_eq!(sig(60.0), MarketSignal::Hold);
        assert_eq!(sig(85.0), MarketSignal::Warning);
    }

    #[test]
    fn test_non_uptrend_signals() {
        let d = BreadthRegimeDetector::default();
        assert_eq!(
            d.signal(&[snap(0, 75.0, 45.0, 40.0)]),
            Some(MarketSignal::Sell)
        );
        assert_eq!(
            d.signal(&[snap(0, 10.0, 20.0, 20.0)]),
            Some(MarketSignal::Danger)
        );
        assert_eq!(
            d.signal(&[snap(0, 35.0, 40.0, 45.0)]),
            Some(MarketSignal::Wait)
        );
    }

    #[test]
    fn test_accumulating_and_early_buy() {
        let d = BreadthRegimeDetector::default();

        // MA20 lows rising over two 7-day windows, everything under 30
        let acc: Vec<BreadthSnapshot> = (0..14)
            .map(|i| {
                let ma20 = if i < 7 { 10.0 } else { 15.0 };
                snap(i, ma20, 20.0, 20.0)
            })
            .collect();
        assert_eq!(d.signal(&acc), Some(MarketSignal::Accumulating));

        // MA20 >= 25 with higher lows on both series
        let early: Vec<BreadthSnapshot> = (0..18)
            .map(|i| {
                let (ma20, ma50) = if i < 9 { (20.0, 30.0) } else { (28.0, 35.0) };
                snap(i, ma20, ma50, 40.0)
            })
            .collect();
        assert_eq!(d.signal(&early), Some(MarketSignal::EarlyBuy));
    }

    #[test]
    fn test_detect_bearish_zero_exposure() {
        let d = BreadthRegimeDetector::default();
        let s = snap(0, 80.0, 90.0, 90.0).with_emas(90.0, 100.0);
        let state = d.detect(&[s]).unwrap();
        assert_eq!(state.regime, Regime::Bearish);
        assert_eq!(state.exposure_pct, 0);
        assert!(state.uptrend_confirmed);
        assert_eq!(state.bottom_stage, None);
    }

    #[test]
    fn test_detect_empty_history() {
        assert_eq!(
            BreadthRegimeDetector::default().detect(&[]),
            Err(EngineError::InsufficientHistory { need: 1, got: 0 })
        );
    }

    #[test]
    fn test_detect_series_local_failures() {
        let d = BreadthRegimeDetector::default();
        let history = vec![
            snap(0, 50.0, 60.0, 60.0),
            BreadthSnapshot::new(day(1), 50.0, 60.0, 60.0),
            snap(2, 50.0, 60.0, 60.0),
        ];
        let states = d.detect_series(&history);
        assert_eq!(states.len(), 3);
        assert!(states[0].is_ok());
        assert!(matches!(states[1], Err(EngineError::MissingBenchmark { .. })));
        assert!(states[2].is_ok());
    }

    #[test]
    fn test_attach_benchmark_emas() {
        let mut history: Vec<BreadthSnapshot> = (0..3)
            .map(|i| BreadthSnapshot::new(day(i), 50.0, 50.0, 50.0))
            .collect();
        attach_benchmark_emas(&mut history, &[100.0, 100.0, 100.0], 9, 21).unwrap();
        assert!(history
            .iter()
            .all(|s| (s.ema_short - 100.0).abs() < 1e-9 && (s.ema_long - 100.0).abs() < 1e-9));
        assert!(attach_benchmark_emas(&mut history, &[1.0], 9, 21).is_err());
    }
}
