//! Two-bar reversal shapes: engulfing, harami, piercing line, dark cloud cover.
//!
//! Engulfing and harami detectors report either polarity; the emitted
//! [`PatternKind`] carries it.

#![allow(clippy::collapsible_if)]

use super::helpers::{self, body_bottom, body_top, is_body_long, is_body_short};
use crate::{
    Direction, EngineError, MarketContext, OHLCVExt, PatternDetector, PatternKind, PatternMatch,
    Ratio, Result, OHLCV,
};

impl_with_defaults!(
    EngulfingDetector,
    HaramiDetector,
    PiercingDetector,
    DarkCloudCoverDetector,
);

fn pair(kind: PatternKind, strength: f64, index: usize) -> PatternMatch {
    PatternMatch {
        kind,
        direction: kind.typical_direction().unwrap_or(Direction::Neutral),
        strength,
        start_index: index - 1,
        end_index: index,
    }
}

// ============================================================
// ENGULFING
// ============================================================

/// Engulfing: the current body swallows the prior opposite-colored body
#[derive(Debug, Clone)]
pub struct EngulfingDetector {
    /// Minimum current body / prior body
    pub min_engulf_ratio: f64,
}

impl Default for EngulfingDetector {
    fn default() -> Self {
        Self {
            min_engulf_ratio: 1.0,
        }
    }
}

impl PatternDetector for EngulfingDetector {
    fn name(&self) -> &'static str {
        "engulfing"
    }

    fn min_bars(&self) -> usize {
        2
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        _ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index < 1 {
            return None;
        }
        let prev = bars.get(index - 1)?;
        let curr = bars.get(index)?;

        if curr.body() < prev.body() * self.min_engulf_ratio || prev.body() <= f64::EPSILON {
            return None;
        }

        // At most one end of the bodies may coincide
        let covers = |open: f64, close: f64, p_open: f64, p_close: f64| {
            let a = close >= p_open && open < p_close;
            let b = close > p_open && open <= p_close;
            a || b
        };

        if curr.is_bullish() && prev.is_bearish() {
            if covers(curr.open(), curr.close(), prev.open(), prev.close()) {
                let strict = curr.open() != prev.close() && curr.close() != prev.open();
                return Some(pair(
                    PatternKind::BullishEngulfing,
                    if strict { 0.7 } else { 0.6 },
                    index,
                ));
            }
        }

        if curr.is_bearish() && prev.is_bullish() {
            // Mirror: negate prices so the bullish test applies
            if covers(-curr.open(), -curr.close(), -prev.open(), -prev.close()) {
                let strict = curr.open() != prev.close() && curr.close() != prev.open();
                return Some(pair(
                    PatternKind::BearishEngulfing,
                    if strict { 0.7 } else { 0.6 },
                    index,
                ));
            }
        }

        None
    }

    fn validate_config(&self) -> Result<()> {
        if !self.min_engulf_ratio.is_finite() || self.min_engulf_ratio <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "engulfing: min_engulf_ratio must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// HARAMI
// ============================================================

/// Harami: short body contained inside a prior long body of the opposite color
#[derive(Debug, Clone)]
pub struct HaramiDetector {
    pub body_long_factor: f64,
    pub body_short_factor: f64,
}

impl Default for HaramiDetector {
    fn default() -> Self {
        Self {
            body_long_factor: helpers::BODY_LONG_FACTOR,
            body_short_factor: helpers::BODY_SHORT_FACTOR,
        }
    }
}

impl PatternDetector for HaramiDetector {
    fn name(&self) -> &'static str {
        "harami"
    }

    fn min_bars(&self) -> usize {
        2
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index < 1 {
            return None;
        }
        let prev = bars.get(index - 1)?;
        let curr = bars.get(index)?;

        let prev_body = prev.body();
        if prev_body <= f64::EPSILON {
            return None;
        }
        let prev_avg_body = helpers::trailing_avg_body(bars, index - 1, 10);
        if !is_body_long(prev_body, prev_avg_body, prev.range(), self.body_long_factor) {
            return None;
        }
        if !is_body_short(curr.body(), ctx.avg_body, curr.range(), self.body_short_factor) {
            return None;
        }

        // One end may touch
        if body_top(curr) > body_top(prev) || body_bottom(curr) < body_bottom(prev) {
            return None;
        }
        if body_top(curr) == body_top(prev) && body_bottom(curr) == body_bottom(prev) {
            return None;
        }

        let kind = if prev.is_bearish() {
            PatternKind::BullishHarami
        } else {
            PatternKind::BearishHarami
        };
        let strength = helpers::scaled_strength(1.0 - curr.body() / prev_body, 0.4, 0.7);
        Some(pair(kind, strength, index))
    }
}

// ============================================================
// PIERCING LINE / DARK CLOUD COVER
// ============================================================

/// Piercing line: long white bar opening below the prior low and closing past
/// the midpoint of the prior long black body
#[derive(Debug, Clone)]
pub struct PiercingDetector {
    pub body_long_factor: f64,
    /// Fraction of the prior body the close must recover
    pub penetration: Ratio,
}

impl Default for PiercingDetector {
    fn default() -> Self {
        Self {
            body_long_factor: helpers::BODY_LONG_FACTOR,
            penetration: Ratio::new_const(0.5),
        }
    }
}

impl PatternDetector for PiercingDetector {
    fn name(&self) -> &'static str {
        "piercing_line"
    }

    fn min_bars(&self) -> usize {
        2
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index < 1 {
            return None;
        }
        let prev = bars.get(index - 1)?;
        let curr = bars.get(index)?;

        if !prev.is_bearish() || !curr.is_bullish() {
            return None;
        }
        let prev_avg_body = helpers::trailing_avg_body(bars, index - 1, 10);
        if !is_body_long(prev.body(), prev_avg_body, prev.range(), self.body_long_factor) {
            return None;
        }
        if !is_body_long(curr.body(), ctx.avg_body, curr.range(), self.body_long_factor) {
            return None;
        }

        let threshold = prev.close() + prev.body() * self.penetration.get();
        if curr.open() >= prev.low() || curr.close() <= threshold || curr.close() >= prev.open() {
            return None;
        }

        let recovered = (curr.close() - prev.close()) / prev.body();
        Some(pair(
            PatternKind::PiercingLine,
            helpers::scaled_strength(recovered, 0.5, 0.8),
            index,
        ))
    }
}

/// Dark cloud cover: long black bar opening above the prior high and closing
/// below the midpoint of the prior long white body
#[derive(Debug, Clone)]
pub struct DarkCloudCoverDetector {
    pub body_long_factor: f64,
    pub penetration: Ratio,
}

impl Default for DarkCloudCoverDetector {
    fn default() -> Self {
        Self {
            body_long_factor: helpers::BODY_LONG_FACTOR,
            penetration: Ratio::new_const(0.5),
        }
    }
}

impl PatternDetector for DarkCloudCoverDetector {
    fn name(&self) -> &'static str {
        "dark_cloud_cover"
    }

    fn min_bars(&self) -> usize {
        2
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index < 1 {
            return None;
        }
        let prev = bars.get(index - 1)?;
        let curr = bars.get(index)?;

        if !prev.is_bullish() || !curr.is_bearish() {
            return None;
        }
        let prev_avg_body = helpers::trailing_avg_body(bars, index - 1, 10);
        if !is_body_long(prev.body(), prev_avg_body, prev.range(), self.body_long_factor) {
            return None;
        }
        if !is_body_long(curr.body(), ctx.avg_body, curr.range(), self.body_long_factor) {
            return None;
        }

        let threshold = prev.close() - prev.body() * self.penetration.get();
        if curr.open() <= prev.high() || curr.close() >= threshold || curr.close() <= prev.open() {
            return None;
        }

        let given_back = (prev.close() - curr.close()) / prev.body();
        Some(pair(
            PatternKind::DarkCloudCover,
            helpers::scaled_strength(given_back, 0.5, 0.8),
            index,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Bar(f64, f64, f64, f64);

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.0
        }
        fn high(&self) -> f64 {
            self.1
        }
        fn low(&self) -> f64 {
            self.2
        }
        fn close(&self) -> f64 {
            self.3
        }
        fn volume(&self) -> f64 {
            1000.0
        }
    }

    fn ctx() -> MarketContext {
        MarketContext {
            avg_body: 3.0,
            avg_range: 5.0,
            avg_range_5: 5.0,
            ..Default::default()
        }
    }

    /// Small-bodied bars so the trailing body average stays low
    fn lead_in() -> Vec<Bar> {
        vec![
            Bar(110.0, 112.0, 108.0, 111.0),
            Bar(111.0, 113.0, 109.0, 110.0),
            Bar(110.0, 112.0, 108.0, 111.0),
        ]
    }

    #[test]
    fn test_bullish_engulfing() {
        let bars = [Bar(102.0, 102.5, 99.5, 100.0), Bar(99.5, 103.5, 99.0, 103.0)];
        let m = EngulfingDetector::with_defaults()
            .detect(&bars, 1, &ctx())
            .unwrap();
        assert_eq!(m.kind, PatternKind::BullishEngulfing);
        assert_eq!(m.direction, Direction::Bullish);
        assert_eq!((m.start_index, m.end_index), (0, 1));
    }

    #[test]
    fn test_bearish_engulfing() {
        let bars = [Bar(100.0, 102.5, 99.5, 102.0), Bar(102.5, 103.0, 98.5, 99.0)];
        let m = EngulfingDetector::with_defaults()
            .detect(&bars, 1, &ctx())
            .unwrap();
        assert_eq!(m.kind, PatternKind::BearishEngulfing);
    }

    #[test]
    fn test_same_color_is_not_engulfing() {
        let bars = [Bar(100.0, 102.5, 99.5, 102.0), Bar(99.5, 104.0, 99.0, 103.5)];
        assert!(EngulfingDetector::with_defaults()
            .detect(&bars, 1, &ctx())
            .is_none());
    }

    #[test]
    fn test_bullish_harami() {
        let mut bars = lead_in();
        bars.push(Bar(111.0, 111.5, 100.5, 101.0));
        bars.push(Bar(104.0, 105.5, 103.5, 105.0));
        let m = HaramiDetector::with_defaults()
            .detect(&bars, 4, &ctx())
            .unwrap();
        assert_eq!(m.kind, PatternKind::BullishHarami);
    }

    #[test]
    fn test_piercing_line() {
        let mut bars = lead_in();
        bars.push(Bar(110.0, 111.0, 99.0, 100.0));
        bars.push(Bar(98.0, 107.0, 97.5, 106.0));
        let m = PiercingDetector::with_defaults()
            .detect(&bars, 4, &ctx())
            .unwrap();
        assert_eq!(m.kind, PatternKind::PiercingLine);
        assert!(m.strength >= 0.5);
    }

    #[test]
    fn test_dark_cloud_cover() {
        let mut bars = lead_in();
        bars.push(Bar(100.0, 111.0, 99.0, 110.0));
        bars.push(Bar(112.0, 112.5, 103.0, 104.0));
        let m = DarkCloudCoverDetector::with_defaults()
            .detect(&bars, 4, &ctx())
            .unwrap();
        assert_eq!(m.kind, PatternKind::DarkCloudCover);
        assert_eq!(m.direction, Direction::Bearish);
    }

    #[test]
    fn test_engulfing_rejects_bad_ratio() {
        let det = EngulfingDetector {
            min_engulf_ratio: 0.0,
        };
        assert!(det.validate_config().is_err());
    }
}
