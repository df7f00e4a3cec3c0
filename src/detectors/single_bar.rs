//! Single-bar candle shapes: doji family, spinning top, hammer family.
//!
//! Shapes are compared against trailing averages of body and range. The doji
//! is read against the trend that preceded it.

#![allow(clippy::collapsible_if)]

use super::helpers::{
    self, body_bottom, body_top, is_body_short, is_doji, is_shadow_long, is_shadow_very_short,
    is_shadow_verylong, scaled_strength, shadow_exceeds_veryshort,
};
use crate::{
    Direction, MarketContext, OHLCVExt, PatternDetector, PatternKind, PatternMatch, Trend, OHLCV,
};

impl_with_defaults!(
    DojiDetector,
    DragonflyDojiDetector,
    GravestoneDojiDetector,
    SpinningTopDetector,
    HammerDetector,
    InvertedHammerDetector,
    HangingManDetector,
    ShootingStarDetector,
);

fn single(kind: PatternKind, direction: Direction, strength: f64, index: usize) -> PatternMatch {
    PatternMatch {
        kind,
        direction,
        strength,
        start_index: index,
        end_index: index,
    }
}

/// Directional read of an indecision candle given the trend before it.
#[inline]
pub fn doji_direction(prior_trend: Trend) -> Direction {
    if prior_trend.is_up() {
        Direction::Bearish
    } else if prior_trend.is_down() {
        Direction::Bullish
    } else {
        Direction::Neutral
    }
}

// ============================================================
// DOJI FAMILY
// ============================================================

/// Doji: open and close practically equal
#[derive(Debug, Clone, Copy)]
pub struct DojiDetector {
    pub doji_factor: f64,
}

impl Default for DojiDetector {
    fn default() -> Self {
        Self {
            doji_factor: helpers::DOJI_FACTOR,
        }
    }
}

impl PatternDetector for DojiDetector {
    fn name(&self) -> &'static str {
        "doji"
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        let bar = bars.get(index)?;
        let body = bar.body();
        let range = bar.range();

        if !is_doji(body, ctx.avg_range, range, self.doji_factor) {
            return None;
        }

        let flatness = if range > 0.0 {
            1.0 - (body / range / helpers::DOJI_RATIO).min(1.0)
        } else {
            0.5
        };

        Some(single(
            PatternKind::Doji,
            doji_direction(ctx.prior_trend),
            scaled_strength(flatness, 0.5, 1.0),
            index,
        ))
    }
}

/// Dragonfly doji: doji at the top of a long lower shadow
#[derive(Debug, Clone, Copy)]
pub struct DragonflyDojiDetector {
    pub doji_factor: f64,
    pub shadow_veryshort_factor: f64,
}

impl Default for DragonflyDojiDetector {
    fn default() -> Self {
        Self {
            doji_factor: helpers::DOJI_FACTOR,
            shadow_veryshort_factor: helpers::SHADOW_VERYSHORT_FACTOR,
        }
    }
}

impl PatternDetector for DragonflyDojiDetector {
    fn name(&self) -> &'static str {
        "dragonfly_doji"
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        let bar = bars.get(index)?;
        let body = bar.body();
        let range = bar.range();

        if !is_doji(body, ctx.avg_range, range, self.doji_factor) {
            return None;
        }
        if !is_shadow_very_short(bar.upper_shadow(), ctx.avg_range, range, self.shadow_veryshort_factor) {
            return None;
        }
        if !shadow_exceeds_veryshort(bar.lower_shadow(), ctx.avg_range, range, self.shadow_veryshort_factor) {
            return None;
        }

        Some(single(PatternKind::DragonflyDoji, Direction::Bullish, 0.7, index))
    }
}

/// Gravestone doji: doji at the bottom of a long upper shadow
#[derive(Debug, Clone, Copy)]
pub struct GravestoneDojiDetector {
    pub doji_factor: f64,
    pub shadow_veryshort_factor: f64,
}

impl Default for GravestoneDojiDetector {
    fn default() -> Self {
        Self {
            doji_factor: helpers::DOJI_FACTOR,
            shadow_veryshort_factor: helpers::SHADOW_VERYSHORT_FACTOR,
        }
    }
}

impl PatternDetector for GravestoneDojiDetector {
    fn name(&self) -> &'static str {
        "gravestone_doji"
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        let bar = bars.get(index)?;
        let body = bar.body();
        let range = bar.range();

        if !is_doji(body, ctx.avg_range, range, self.doji_factor) {
            return None;
        }
        if !is_shadow_very_short(bar.lower_shadow(), ctx.avg_range, range, self.shadow_veryshort_factor) {
            return None;
        }
        if !shadow_exceeds_veryshort(bar.upper_shadow(), ctx.avg_range, range, self.shadow_veryshort_factor) {
            return None;
        }

        Some(single(PatternKind::GravestoneDoji, Direction::Bearish, 0.7, index))
    }
}

/// Spinning top: small body with both shadows longer than the body
#[derive(Debug, Clone, Copy)]
pub struct SpinningTopDetector {
    pub doji_factor: f64,
    pub body_short_factor: f64,
}

impl Default for SpinningTopDetector {
    fn default() -> Self {
        Self {
            doji_factor: helpers::DOJI_FACTOR,
            body_short_factor: helpers::BODY_SHORT_FACTOR,
        }
    }
}

impl PatternDetector for SpinningTopDetector {
    fn name(&self) -> &'static str {
        "spinning_top"
    }

    fn min_bars(&self) -> usize {
        1
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        let bar = bars.get(index)?;
        let body = bar.body();
        let range = bar.range();

        // A doji is reported by its own detector
        if range <= 0.0 || is_doji(body, ctx.avg_range, range, self.doji_factor) {
            return None;
        }
        if !is_body_short(body, ctx.avg_body, range, self.body_short_factor) {
            return None;
        }
        if !is_shadow_long(bar.upper_shadow(), body) || !is_shadow_long(bar.lower_shadow(), body) {
            return None;
        }

        Some(single(PatternKind::SpinningTop, Direction::Neutral, 0.5, index))
    }
}

// ============================================================
// HAMMER FAMILY
// ============================================================

/// Hammer: small body on top of a long lower shadow, at or below the prior low
#[derive(Debug, Clone, Copy)]
pub struct HammerDetector {
    pub body_short_factor: f64,
    pub shadow_verylong_factor: f64,
    pub shadow_veryshort_factor: f64,
    pub near_factor: f64,
}

impl Default for HammerDetector {
    fn default() -> Self {
        Self {
            body_short_factor: helpers::BODY_SHORT_FACTOR,
            shadow_verylong_factor: helpers::SHADOW_VERYLONG_FACTOR,
            shadow_veryshort_factor: helpers::SHADOW_VERYSHORT_FACTOR,
            near_factor: helpers::NEAR_FACTOR,
        }
    }
}

impl PatternDetector for HammerDetector {
    fn name(&self) -> &'static str {
        "hammer"
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
        let bar = bars.get(index)?;
        let prev = bars.get(index - 1)?;

        let body = bar.body();
        let range = bar.range();
        let lower = bar.lower_shadow();

        if range <= 0.0 || !is_body_short(body, ctx.avg_body, range, self.body_short_factor) {
            return None;
        }
        if !is_shadow_verylong(lower, body, self.shadow_verylong_factor) {
            return None;
        }
        if !is_shadow_very_short(bar.upper_shadow(), ctx.avg_range, range, self.shadow_veryshort_factor) {
            return None;
        }
        // Body must sit at or below the prior low
        let near = helpers::trailing_avg_range(bars, index - 1, 5) * self.near_factor;
        if body_bottom(bar) > prev.low() + near {
            return None;
        }

        Some(single(
            PatternKind::Hammer,
            Direction::Bullish,
            scaled_strength(lower / range, 0.5, 0.9),
            index,
        ))
    }
}

/// Inverted hammer: long upper shadow after a real-body gap down
#[derive(Debug, Clone, Copy)]
pub struct InvertedHammerDetector {
    pub body_short_factor: f64,
    pub shadow_veryshort_factor: f64,
}

impl Default for InvertedHammerDetector {
    fn default() -> Self {
        Self {
            body_short_factor: helpers::BODY_SHORT_FACTOR,
            shadow_veryshort_factor: helpers::SHADOW_VERYSHORT_FACTOR,
        }
    }
}

impl PatternDetector for InvertedHammerDetector {
    fn name(&self) -> &'static str {
        "inverted_hammer"
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
        let bar = bars.get(index)?;
        let prev = bars.get(index - 1)?;

        if body_top(bar) >= body_bottom(prev) {
            return None;
        }

        let body = bar.body();
        let range = bar.range();
        if range <= 0.0 || !is_body_short(body, ctx.avg_body, range, self.body_short_factor) {
            return None;
        }
        if !is_shadow_long(bar.upper_shadow(), body) {
            return None;
        }
        if !is_shadow_very_short(bar.lower_shadow(), ctx.avg_range, range, self.shadow_veryshort_factor) {
            return None;
        }

        Some(single(PatternKind::InvertedHammer, Direction::Bullish, 0.6, index))
    }
}

/// Hanging man: hammer shape at or above the prior high
#[derive(Debug, Clone, Copy)]
pub struct HangingManDetector {
    pub body_short_factor: f64,
    pub shadow_verylong_factor: f64,
    pub shadow_veryshort_factor: f64,
    pub near_factor: f64,
}

impl Default for HangingManDetector {
    fn default() -> Self {
        Self {
            body_short_factor: helpers::BODY_SHORT_FACTOR,
            shadow_verylong_factor: helpers::SHADOW_VERYLONG_FACTOR,
            shadow_veryshort_factor: helpers::SHADOW_VERYSHORT_FACTOR,
            near_factor: helpers::NEAR_FACTOR,
        }
    }
}

impl PatternDetector for HangingManDetector {
    fn name(&self) -> &'static str {
        "hanging_man"
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
        let bar = bars.get(index)?;
        let prev = bars.get(index - 1)?;

        let body = bar.body();
        let range = bar.range();
        let lower = bar.lower_shadow();

        if range <= 0.0 || !is_body_short(body, ctx.avg_body, range, self.body_short_factor) {
            return None;
        }
        if !is_shadow_verylong(lower, body, self.shadow_verylong_factor) {
            return None;
        }
        if !is_shadow_very_short(bar.upper_shadow(), ctx.avg_range, range, self.shadow_veryshort_factor) {
            return None;
        }
        let near = helpers::trailing_avg_range(bars, index - 1, 5) * self.near_factor;
        if body_bottom(bar) < prev.high() - near {
            return None;
        }

        Some(single(
            PatternKind::HangingMan,
            Direction::Bearish,
            scaled_strength(lower / range, 0.5, 0.9),
            index,
        ))
    }
}

/// Shooting star: long upper shadow after a real-body gap up
#[derive(Debug, Clone, Copy)]
pub struct ShootingStarDetector {
    pub body_short_factor: f64,
    pub shadow_verylong_factor: f64,
    pub shadow_veryshort_factor: f64,
}

impl Default for ShootingStarDetector {
    fn default() -> Self {
        Self {
            body_short_factor: helpers::BODY_SHORT_FACTOR,
            shadow_verylong_factor: helpers::SHADOW_VERYLONG_FACTOR,
            shadow_veryshort_factor: helpers::SHADOW_VERYSHORT_FACTOR,
        }
    }
}

impl PatternDetector for ShootingStarDetector {
    fn name(&self) -> &'static str {
        "shooting_star"
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
        let bar = bars.get(index)?;
        let prev = bars.get(index - 1)?;

        if body_bottom(bar) <= body_top(prev) {
            return None;
        }

        let body = bar.body();
        let range = bar.range();
        let upper = bar.upper_shadow();
        if range <= 0.0 || !is_body_short(body, ctx.avg_body, range, self.body_short_factor) {
            return None;
        }
        if !is_shadow_verylong(upper, body, self.shadow_verylong_factor) {
            return None;
        }
        if !is_shadow_very_short(bar.lower_shadow(), ctx.avg_range, range, self.shadow_veryshort_factor) {
            return None;
        }

        Some(single(
            PatternKind::ShootingStar,
            Direction::Bearish,
            scaled_strength(upper / range, 0.5, 0.9),
            index,
        ))
    }
}
