//! Three-bar shapes: morning/evening star, three white soldiers, three black crows.

#![allow(clippy::collapsible_if)]

use super::helpers::{self, body_bottom, body_top, is_body_long, is_body_short};
use crate::{
    Direction, EngineError, MarketContext, OHLCVExt, PatternDetector, PatternKind, PatternMatch,
    Result, OHLCV,
};

impl_with_defaults!(
    MorningStarDetector,
    EveningStarDetector,
    ThreeWhiteSoldiersDetector,
    ThreeBlackCrowsDetector,
);

fn triple(kind: PatternKind, direction: Direction, strength: f64, index: usize) -> PatternMatch {
    PatternMatch {
        kind,
        direction,
        strength,
        start_index: index - 2,
        end_index: index,
    }
}

fn check_penetration(name: &str, penetration: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&penetration) {
        return Err(EngineError::InvalidConfig(format!(
            "{name}: penetration {penetration} outside [0, 1]"
        )));
    }
    Ok(())
}

// ============================================================
// STARS
// ============================================================

/// Morning star: long black bar, small body gapping down, white bar closing
/// well into the first body
#[derive(Debug, Clone)]
pub struct MorningStarDetector {
    pub body_long_factor: f64,
    pub body_short_factor: f64,
    pub penetration: f64,
}

impl Default for MorningStarDetector {
    fn default() -> Self {
        Self {
            body_long_factor: helpers::BODY_LONG_FACTOR,
            body_short_factor: helpers::BODY_SHORT_FACTOR,
            penetration: 0.3,
        }
    }
}

impl PatternDetector for MorningStarDetector {
    fn name(&self) -> &'static str {
        "morning_star"
    }

    fn min_bars(&self) -> usize {
        3
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        _ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index < 2 {
            return None;
        }
        let first = bars.get(index - 2)?;
        let second = bars.get(index - 1)?;
        let third = bars.get(index)?;

        if !first.is_bearish() || !third.is_bullish() {
            return None;
        }

        let first_body = first.body();
        let avg_first = helpers::trailing_avg_body(bars, index - 2, 10);
        if !is_body_long(first_body, avg_first, first.range(), self.body_long_factor) {
            return None;
        }
        let avg_second = helpers::trailing_avg_body(bars, index - 1, 10);
        if !is_body_short(second.body(), avg_second, second.range(), self.body_short_factor) {
            return None;
        }
        // Star body gaps below the first body
        if body_top(second) >= body_bottom(first) {
            return None;
        }
        if third.body() <= helpers::trailing_avg_body(bars, index, 10) {
            return None;
        }
        if third.close() <= first.close() + first_body * self.penetration {
            return None;
        }

        let recovered = (third.close() - first.close()) / first_body;
        Some(triple(
            PatternKind::MorningStar,
            Direction::Bullish,
            helpers::scaled_strength(recovered, 0.6, 0.9),
            index,
        ))
    }

    fn validate_config(&self) -> Result<()> {
        check_penetration("morning_star", self.penetration)
    }
}

/// Evening star: mirror of the morning star at a top
#[derive(Debug, Clone)]
pub struct EveningStarDetector {
    pub body_long_factor: f64,
    pub body_short_factor: f64,
    pub penetration: f64,
}

impl Default for EveningStarDetector {
    fn default() -> Self {
        Self {
            body_long_factor: helpers::BODY_LONG_FACTOR,
            body_short_factor: helpers::BODY_SHORT_FACTOR,
            penetration: 0.3,
        }
    }
}

impl PatternDetector for EveningStarDetector {
    fn name(&self) -> &'static str {
        "evening_star"
    }

    fn min_bars(&self) -> usize {
        3
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        _ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index < 2 {
            return None;
        }
        let first = bars.get(index - 2)?;
        let second = bars.get(index - 1)?;
        let third = bars.get(index)?;

        if !first.is_bullish() || !third.is_bearish() {
            return None;
        }

        let first_body = first.body();
        let avg_first = helpers::trailing_avg_body(bars, index - 2, 10);
        if !is_body_long(first_body, avg_first, first.range(), self.body_long_factor) {
            return None;
        }
        let avg_second = helpers::trailing_avg_body(bars, index - 1, 10);
        if !is_body_short(second.body(), avg_second, second.range(), self.body_short_factor) {
            return None;
        }
        if body_bottom(second) <= body_top(first) {
            return None;
        }
        if third.body() <= helpers::trailing_avg_body(bars, index, 10) {
            return None;
        }
        if third.close() >= first.close() - first_body * self.penetration {
            return None;
        }

        let given_back = (first.close() - third.close()) / first_body;
        Some(triple(
            PatternKind::EveningStar,
            Direction::Bearish,
            helpers::scaled_strength(given_back, 0.6, 0.9),
            index,
        ))
    }

    fn validate_config(&self) -> Result<()> {
        check_penetration("evening_star", self.penetration)
    }
}

// ============================================================
// SOLDIERS / CROWS
// ============================================================

/// Three white soldiers: three rising white bars, each opening inside the
/// prior body and closing near its high
#[derive(Debug, Clone)]
pub struct ThreeWhiteSoldiersDetector {
    /// Max upper shadow as a fraction of the bar's range
    pub max_shadow_ratio: f64,
}

impl Default for ThreeWhiteSoldiersDetector {
    fn default() -> Self {
        Self {
            max_shadow_ratio: 0.25,
        }
    }
}

impl PatternDetector for ThreeWhiteSoldiersDetector {
    fn name(&self) -> &'static str {
        "three_white_soldiers"
    }

    fn min_bars(&self) -> usize {
        3
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index < 2 {
            return None;
        }
        let window = [bars.get(index - 2)?, bars.get(index - 1)?, bars.get(index)?];

        if !window.iter().all(|b| b.is_bullish()) {
            return None;
        }
        for pair in window.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            if curr.close() <= prev.close() {
                return None;
            }
            if curr.open() < prev.open() || curr.open() > prev.close() {
                return None;
            }
        }
        for bar in window {
            let range = bar.range();
            if range <= 0.0 || bar.upper_shadow() / range > self.max_shadow_ratio {
                return None;
            }
        }

        let bodies = window.iter().map(|b| b.body()).sum::<f64>() / 3.0;
        let strength = if ctx.avg_body > 0.0 {
            helpers::scaled_strength(bodies / ctx.avg_body / 2.0, 0.6, 0.9)
        } else {
            0.6
        };
        Some(triple(
            PatternKind::ThreeWhiteSoldiers,
            Direction::Bullish,
            strength,
            index,
        ))
    }

    fn validate_config(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_shadow_ratio) {
            return Err(EngineError::InvalidConfig(
                "three_white_soldiers: max_shadow_ratio outside [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Three black crows: three falling black bars, each opening inside the
/// prior body and closing near its low
#[derive(Debug, Clone)]
pub struct ThreeBlackCrowsDetector {
    pub max_shadow_ratio: f64,
}

impl Default for ThreeBlackCrowsDetector {
    fn default() -> Self {
        Self {
            max_shadow_ratio: 0.25,
        }
    }
}

impl PatternDetector for ThreeBlackCrowsDetector {
    fn name(&self) -> &'static str {
        "three_black_crows"
    }

    fn min_bars(&self) -> usize {
        3
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        if index < 2 {
            return None;
        }
        let window = [bars.get(index - 2)?, bars.get(index - 1)?, bars.get(index)?];

        if !window.iter().all(|b| b.is_bearish()) {
            return None;
        }
        for pair in window.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            if curr.close() >= prev.close() {
                return None;
            }
            if curr.open() > prev.open() || curr.open() < prev.close() {
                return None;
            }
        }
        for bar in window {
            let range = bar.range();
            if range <= 0.0 || bar.lower_shadow() / range > self.max_shadow_ratio {
                return None;
            }
        }

        let bodies = window.iter().map(|b| b.body()).sum::<f64>() / 3.0;
        let strength = if ctx.avg_body > 0.0 {
            helpers::scaled_strength(bodies / ctx.avg_body / 2.0, 0.6, 0.9)
        } else {
            0.6
        };
        Some(triple(
            PatternKind::ThreeBlackCrows,
            Direction::Bearish,
            strength,
            index,
        ))
    }

    fn validate_config(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_shadow_ratio) {
            return Err(EngineError::InvalidConfig(
                "three_black_crows: max_shadow_ratio outside [0, 1]".into(),
            ));
        }
        Ok(())
    }
}
