//! Support/resistance from the recent swing range and its Fibonacci
//! retracements.

use serde::{Deserialize, Serialize};

use crate::{indicators, EngineError, Period, Result, OHLCV};

/// Retracement levels measured down from the swing high
pub const FIB_RETRACEMENTS: [f64; 4] = [0.236, 0.382, 0.5, 0.618];

/// Nearest levels around the latest close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SrLevels {
    pub close: f64,
    /// Nearest level at or below the close
    pub support: Option<f64>,
    /// Nearest level above the close
    pub resistance: Option<f64>,
    pub distance_to_support_pct: Option<f64>,
    pub distance_to_resistance_pct: Option<f64>,
    /// Long-side reward:risk, (resistance - close) / (close - support)
    pub reward_risk: Option<f64>,
    pub swing_high: f64,
    pub swing_low: f64,
    pub atr: f64,
}

impl SrLevels {
    /// Reward:risk for a trade in the given direction. Shorts invert the
    /// long-side ratio.
    pub fn reward_risk_for(&self, bullish: bool) -> Option<f64> {
        if bullish {
            self.reward_risk
        } else {
            self.reward_risk
                .filter(|rr| *rr > 0.0)
                .map(|rr| 1.0 / rr)
        }
    }

    /// Distance to the level a trade in this direction leans on.
    pub fn distance_for(&self, bullish: bool) -> Option<f64> {
        if bullish {
            self.distance_to_support_pct
        } else {
            self.distance_to_resistance_pct
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportResistanceLocator {
    pub lookback: Period,
    pub atr_period: Period,
    /// Swing range must span at least this many ATRs
    pub min_range_atr: f64,
}

impl Default for SupportResistanceLocator {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(30),
            atr_period: Period::new_const(14),
            min_range_atr: 5.0,
        }
    }
}

impl SupportResistanceLocator {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_range_atr.is_finite() && self.min_range_atr >= 0.0) {
            return Err(EngineError::InvalidConfig(
                "levels: min_range_atr must be >= 0".into(),
            ));
        }
        Ok(())
    }

    /// Bars needed before any level can be located.
    pub fn min_history(&self) -> usize {
        self.lookback.get().max(self.atr_period.get() + 1)
    }

    /// Locate support and resistance around the last close.
    ///
    /// A swing range narrower than `min_range_atr` ATRs has no meaningful
    /// structure and yields [`EngineError::InvalidRange`].
    pub fn locate<T: OHLCV>(&self, bars: &[T]) -> Result<SrLevels> {
        let need = self.min_history();
        if bars.len() < need {
            return Err(EngineError::InsufficientHistory {
                need,
                got: bars.len(),
            });
        }

        let window = &bars[bars.len() - self.lookback.get()..];
        let swing_high = window.iter().map(|b| b.high()).fold(f64::NEG_INFINITY, f64::max);
        let swing_low = window.iter().map(|b| b.low()).fold(f64::INFINITY, f64::min);
        let atr = indicators::latest_atr(bars, self.atr_period.get())
            .ok_or(EngineError::InvalidValue("ATR undefined"))?;

        let range = swing_high - swing_low;
        let min_range = atr * self.min_range_atr;
        if !(range.is_finite() && range >= min_range) {
            return Err(EngineError::InvalidRange { range, min_range });
        }

        let close = window[window.len() - 1].close();
        let levels = FIB_RETRACEMENTS
            .iter()
            .map(|f| swing_high - range * f)
            .chain([swing_high, swing_low]);

        let mut support: Option<f64> = None;
        let mut resistance: Option<f64> = None;
        for level in levels {
            if level <= close {
                support = Some(support.map_or(level, |s| s.max(level)));
            } else {
                resistance = Some(resistance.map_or(level, |r| r.min(level)));
            }
        }

        let pct = |d: f64| d * 100.0 / close;
        let reward_risk = match (support, resistance) {
            (Some(s), Some(r)) if close > s => Some((r - close) / (close - s)),
            _ => None,
        };

        Ok(SrLevels {
            close,
            support,
            resistance,
            distance_to_support_pct: support.map(|s| pct(close - s)),
            distance_to_resistance_pct: resistance.map(|r| pct(r - close)),
            reward_risk,
            swing_high,
            swing_low,
            atr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Bar {
        h: f64,
        l: f64,
        c: f64,
    }

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.c
        }
        fn high(&self) -> f64 {
            self.h
        }
        fn low(&self) -> f64 {
            self.l
        }
        fn close(&self) -> f64 {
            self.c
        }
        fn volume(&self) -> f64 {
            1.0
        }
    }

    /// Rally from 100 to 129 in 1-point steps, each bar 1 point wide
    fn rally() -> Vec<Bar> {
        (0..30)
            .map(|i| {
                let c = 100.0 + i as f64;
                Bar {
                    h: c + 0.5,
                    l: c - 0.5,
                    c,
                }
            })
            .collect()
    }

    #[test]
    fn test_levels_around_close() {
        let mut bars = rally();
        // Pull back into the range
        bars.push(Bar {
            h: 121.0,
            l: 119.0,
            c: 120.0,
        });
        let sr = SupportResistanceLocator::default().locate(&bars).unwrap();
        // Window is bars 1..=30: high 129.5, low 100.5, range 29
        assert_eq!(sr.swing_high, 129.5);
        assert_eq!(sr.swing_low, 100.5);
        let s = sr.support.unwrap();
        let r = sr.resistance.unwrap();
        assert!((s - (129.5 - 29.0 * 0.382)).abs() < 1e-9);
        assert!((r - (129.5 - 29.0 * 0.236)).abs() < 1e-9);
        assert!(s <= 120.0 && r > 120.0);
        assert!(sr.reward_risk.unwrap() > 0.0);
    }

    #[test]
    fn test_narrow_range_is_invalid() {
        let bars: Vec<Bar> = (0..40)
            .map(|i| {
                let c = 100.0 + (i % 2) as f64 * 0.5;
                Bar {
                    h: c + 1.0,
                    l: c - 1.0,
                    c,
                }
            })
            .collect();
        assert!(matches!(
            SupportResistanceLocator::default().locate(&bars),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_insufficient_history() {
        let bars = &rally()[..10];
        assert_eq!(
            SupportResistanceLocator::default().locate(bars),
            Err(EngineError::InsufficientHistory { need: 30, got: 10 })
        );
    }

    #[test]
    fn test_close_at_high_has_no_resistance() {
        let sr = SupportResistanceLocator::default().locate(&rally()).unwrap();
        assert!(sr.resistance.is_some());
        let mut bars = rally();
        bars.push(Bar {
            h: 131.0,
            l: 129.0,
            c: 131.0,
        });
        let sr = SupportResistanceLocator::default().locate(&bars).unwrap();
        assert!(sr.resistance.is_none());
        assert_eq!(sr.support, Some(131.0));
        assert!(sr.reward_risk.is_none());
    }
}
