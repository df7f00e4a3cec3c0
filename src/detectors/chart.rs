//! Chart-structure detectors: range breakouts and moving-average crosses.

use super::helpers::scaled_strength;
use crate::{
    indicators, Direction, EngineError, MarketContext, PatternDetector, PatternKind,
    PatternMatch, Period, Result, OHLCV,
};

impl_with_defaults!(BreakoutDetector, MaCrossoverDetector);

// ============================================================
// BREAKOUT / BREAKDOWN
// ============================================================

/// Close beyond the highest high (breakout) or lowest low (breakdown) of the
/// prior `lookback` bars
#[derive(Debug, Clone)]
pub struct BreakoutDetector {
    pub lookback: Period,
    /// Volume at or above `avg_volume * volume_factor` confirms the move
    pub volume_factor: f64,
}

impl Default for BreakoutDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(20),
            volume_factor: 1.5,
        }
    }
}

impl PatternDetector for BreakoutDetector {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn min_bars(&self) -> usize {
        self.lookback.get() + 1
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        let lookback = self.lookback.get();
        if index < lookback {
            return None;
        }
        let bar = bars.get(index)?;
        let prior = &bars[index - lookback..index];

        let prior_high = prior.iter().map(|b| b.high()).fold(f64::NEG_INFINITY, f64::max);
        let prior_low = prior.iter().map(|b| b.low()).fold(f64::INFINITY, f64::min);

        let (kind, excess) = if bar.close() > prior_high {
            (PatternKind::Breakout, bar.close() - prior_high)
        } else if bar.close() < prior_low {
            (PatternKind::Breakdown, prior_low - bar.close())
        } else {
            return None;
        };

        let mut strength = if ctx.avg_range > 0.0 {
            scaled_strength(excess / ctx.avg_range, 0.5, 0.8)
        } else {
            0.5
        };
        if ctx.avg_volume > 0.0 && bar.volume() >= ctx.avg_volume * self.volume_factor {
            strength = (strength + 0.2).min(1.0);
        }

        Some(PatternMatch {
            kind,
            direction: kind.typical_direction().unwrap_or(Direction::Neutral),
            strength,
            start_index: index - lookback,
            end_index: index,
        })
    }

    fn validate_config(&self) -> Result<()> {
        if !self.volume_factor.is_finite() || self.volume_factor < 0.0 {
            return Err(EngineError::InvalidConfig(
                "breakout: volume_factor must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// MOVING-AVERAGE CROSS
// ============================================================

/// Fast SMA of closes crossing the slow SMA on this bar
#[derive(Debug, Clone)]
pub struct MaCrossoverDetector {
    pub fast: Period,
    pub slow: Period,
}

impl Default for MaCrossoverDetector {
    fn default() -> Self {
        Self {
            fast: Period::new_const(20),
            slow: Period::new_const(50),
        }
    }
}

impl PatternDetector for MaCrossoverDetector {
    fn name(&self) -> &'static str {
        "ma_crossover"
    }

    fn min_bars(&self) -> usize {
        self.slow.get() + 1
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        _ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index == 0 {
            return None;
        }
        let (fast, slow) = (self.fast.get(), self.slow.get());
        let fast_now = indicators::sma_close_at(bars, index, fast)?;
        let slow_now = indicators::sma_close_at(bars, index, slow)?;
        let fast_prev = indicators::sma_close_at(bars, index - 1, fast)?;
        let slow_prev = indicators::sma_close_at(bars, index - 1, slow)?;

        let kind = if fast_prev <= slow_prev && fast_now > slow_now {
            PatternKind::GoldenCross
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            PatternKind::DeathCross
        } else {
            return None;
        };

        // Steeper crossings read stronger: 1% spread per bar saturates
        let spread = if slow_now > 0.0 {
            ((fast_now - slow_now) / slow_now).abs() * 100.0
        } else {
            0.0
        };

        Some(PatternMatch {
            kind,
            direction: kind.typical_direction().unwrap_or(Direction::Neutral),
            strength: scaled_strength(spread, 0.5, 0.8),
            start_index: index + 1 - slow,
            end_index: index,
        })
    }

    fn validate_config(&self) -> Result<()> {
        if self.fast >= self.slow {
            return Err(EngineError::InvalidConfig(format!(
                "ma_crossover: fast period {} must be shorter than slow period {}",
                self.fast.get(),
                self.slow.get()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Bar {
        c: f64,
        v: f64,
    }

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.c
        }
        fn high(&self) -> f64 {
            self.c + 0.5
        }
        fn low(&self) -> f64 {
            self.c - 0.5
        }
        fn close(&self) -> f64 {
            self.c
        }
        fn volume(&self) -> f64 {
            self.v
        }
    }

    fn flat(n: usize, c: f64) -> Vec<Bar> {
        (0..n).map(|_| Bar { c, v: 1000.0 }).collect()
    }

    fn ctx() -> MarketContext {
        MarketContext {
            avg_volume: 1000.0,
            avg_range: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_breakout_with_volume() {
        let mut bars = flat(20, 100.0);
        bars.push(Bar { c: 102.0, v: 3000.0 });
        let m = BreakoutDetector::with_defaults()
            .detect(&bars, 20, &ctx())
            .unwrap();
        assert_eq!(m.kind, PatternKind::Breakout);
        assert_eq!(m.direction, Direction::Bullish);
        assert!(m.strength > 0.8);
    }

    #[test]
    fn test_breakdown() {
        let mut bars = flat(20, 100.0);
        bars.push(Bar { c: 98.0, v: 1000.0 });
        let m = BreakoutDetector::with_defaults()
            .detect(&bars, 20, &ctx())
            .unwrap();
        assert_eq!(m.kind, PatternKind::Breakdown);
    }

    #[test]
    fn test_inside_range_is_none() {
        let mut bars = flat(20, 100.0);
        bars.push(Bar { c: 100.4, v: 1000.0 });
        assert!(BreakoutDetector::with_defaults()
            .detect(&bars, 20, &ctx())
            .is_none());
    }

    #[test]
    fn test_golden_cross() {
        let det = MaCrossoverDetector {
            fast: Period::new_const(2),
            slow: Period::new_const(4),
        };
        // fast 95 < slow 97.5 at index 3, fast 102.5 > slow 100 at index 4
        let bars: Vec<Bar> = [100.0, 100.0, 95.0, 95.0, 110.0]
            .iter()
            .map(|&c| Bar { c, v: 1000.0 })
            .collect();
        let m = det.detect(&bars, 4, &ctx()).unwrap();
        assert_eq!(m.kind, PatternKind::GoldenCross);
        assert_eq!(m.start_index, 1);
    }

    #[test]
    fn test_cross_needs_history() {
        let bars = flat(10, 100.0);
        assert!(MaCrossoverDetector::with_defaults()
            .detect(&bars, 9, &ctx())
            .is_none());
    }

    #[test]
    fn test_crossover_periods_validated() {
        let det = MaCrossoverDetector {
            fast: Period::new_const(50),
            slow: Period::new_const(20),
        };
        assert!(det.validate_config().is_err());
    }
}
