//! Shared thresholds and comparisons for the candle-shape detectors.
//!
//! Shapes are judged against trailing averages of the instrument's own bars,
//! with a ratio-of-range fallback when the averages are degenerate.

use crate::{OHLCVExt, OHLCV};

// ============================================================
// THRESHOLDS
// ============================================================

/// Body is doji-like: body <= avg_range * DOJI_FACTOR
pub const DOJI_FACTOR: f64 = 0.1;
/// Body is short: body < avg_body * BODY_SHORT_FACTOR
pub const BODY_SHORT_FACTOR: f64 = 1.0;
/// Body is long: body > avg_body * BODY_LONG_FACTOR
pub const BODY_LONG_FACTOR: f64 = 1.0;
/// Shadow is very long: shadow > body * SHADOW_VERYLONG_FACTOR
pub const SHADOW_VERYLONG_FACTOR: f64 = 2.0;
/// Shadow is very short: shadow < avg_range * SHADOW_VERYSHORT_FACTOR
pub const SHADOW_VERYSHORT_FACTOR: f64 = 0.1;
/// Near threshold for price near-equality, as a fraction of the 5-bar average range
pub const NEAR_FACTOR: f64 = 0.2;

// Fallback ratio-based thresholds (when averages are not meaningful)
pub const DOJI_RATIO: f64 = 0.1;
pub const BODY_SHORT_RATIO: f64 = 0.3;
pub const BODY_LONG_RATIO: f64 = 0.6;
pub const SHADOW_SHORT_RATIO: f64 = 0.1;

// ============================================================
// SHAPE COMPARISONS
// ============================================================

/// Body is doji-like. A zero body is always a doji.
#[inline]
pub fn is_doji(body: f64, avg_range: f64, range: f64, factor: f64) -> bool {
    if body <= 0.0 {
        return true;
    }
    if avg_range > 0.0 {
        body <= avg_range * factor
    } else {
        range > 0.0 && body / range <= DOJI_RATIO
    }
}

#[inline]
pub fn is_body_short(body: f64, avg_body: f64, range: f64, factor: f64) -> bool {
    if avg_body > 0.0 {
        body < avg_body * factor
    } else {
        range > 0.0 && body / range <= BODY_SHORT_RATIO
    }
}

#[inline]
pub fn is_body_long(body: f64, avg_body: f64, range: f64, factor: f64) -> bool {
    if avg_body > 0.0 {
        body > avg_body * factor
    } else {
        range > 0.0 && body / range >= BODY_LONG_RATIO
    }
}

/// Shadow longer than the bar's own body
#[inline]
pub fn is_shadow_long(shadow: f64, body: f64) -> bool {
    shadow > body
}

#[inline]
pub fn is_shadow_verylong(shadow: f64, body: f64, factor: f64) -> bool {
    shadow > body * factor
}

#[inline]
pub fn is_shadow_very_short(shadow: f64, avg_range: f64, range: f64, factor: f64) -> bool {
    if avg_range > 0.0 {
        shadow < avg_range * factor
    } else {
        range > 0.0 && shadow / range <= SHADOW_SHORT_RATIO
    }
}

/// Inverse of [`is_shadow_very_short`]: the shadow is meaningfully long.
#[inline]
pub fn shadow_exceeds_veryshort(shadow: f64, avg_range: f64, range: f64, factor: f64) -> bool {
    let threshold = avg_range * factor;
    if threshold > 0.0 {
        shadow > threshold
    } else if range > 0.0 {
        shadow / range > SHADOW_SHORT_RATIO
    } else {
        false
    }
}

// ============================================================
// TRAILING AVERAGES
// ============================================================

/// Average body over the `period` bars before `at`. Bar 0 uses itself.
#[inline]
pub fn trailing_avg_body<T: OHLCV>(bars: &[T], at: usize, period: usize) -> f64 {
    if at == 0 {
        return bars[0].body();
    }
    let slice = &bars[at.saturating_sub(period)..at];
    slice.iter().map(|b| b.body()).sum::<f64>() / slice.len() as f64
}

/// Average range over the `period` bars before `at`. Bar 0 uses itself.
#[inline]
pub fn trailing_avg_range<T: OHLCV>(bars: &[T], at: usize, period: usize) -> f64 {
    if at == 0 {
        return bars[0].range();
    }
    let slice = &bars[at.saturating_sub(period)..at];
    slice.iter().map(|b| OHLCVExt::range(b)).sum::<f64>() / slice.len() as f64
}

/// Top of the real body
#[inline]
pub fn body_top<T: OHLCV>(bar: &T) -> f64 {
    bar.open().max(bar.close())
}

/// Bottom of the real body
#[inline]
pub fn body_bottom<T: OHLCV>(bar: &T) -> f64 {
    bar.open().min(bar.close())
}

/// Body-to-range ratio mapped onto a detector magnitude in [lo, hi].
#[inline]
pub fn scaled_strength(value: f64, lo: f64, hi: f64) -> f64 {
    (lo + (hi - lo) * value.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_body_is_doji() {
        assert!(is_doji(0.0, 10.0, 5.0, DOJI_FACTOR));
        assert!(!is_doji(2.0, 10.0, 5.0, DOJI_FACTOR));
    }

    #[test]
    fn test_ratio_fallback_when_average_degenerate() {
        assert!(is_body_long(7.0, 0.0, 10.0, BODY_LONG_FACTOR));
        assert!(!is_body_long(5.0, 0.0, 10.0, BODY_LONG_FACTOR));
        assert!(is_body_short(2.0, 0.0, 10.0, BODY_SHORT_FACTOR));
    }

    #[test]
    fn test_scaled_strength_bounds() {
        assert_eq!(scaled_strength(-1.0, 0.5, 0.9), 0.5);
        assert_eq!(scaled_strength(2.0, 0.5, 0.9), 0.9);
    }
}
