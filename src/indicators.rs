//! Moving averages, true range and robust statistics over `f64` series.
//!
//! Series outputs have the same length as their input and hold `NaN` where
//! the value is not yet defined (warmup or a non-finite input).

use crate::OHLCV;

/// Simple moving average. `NaN` until `period` finite values fill the window.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }

    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_finite()) {
            out[i] = window.iter().sum::<f64>() / period as f64;
        }
    }
    out
}

/// Exponential moving average with `alpha = 2 / (period + 1)`, seeded by the
/// first finite value. A non-finite input carries the previous value forward.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);

    let mut prev: Option<f64> = None;
    for (i, &v) in values.iter().enumerate() {
        let next = match (prev, v.is_finite()) {
            (None, true) => Some(v),
            (Some(p), true) => Some(alpha * v + (1.0 - alpha) * p),
            (p, false) => p,
        };
        if let Some(x) = next {
            out[i] = x;
        }
        prev = next;
    }
    out
}

/// True range. Bar 0 uses `high - low`.
pub fn true_range<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let hl = bar.high() - bar.low();
            if i == 0 {
                return hl;
            }
            let pc = bars[i - 1].close();
            hl.max((bar.high() - pc).abs()).max((bar.low() - pc).abs())
        })
        .collect()
}

/// Average true range with Wilder smoothing: the first value is the mean of
/// the first `period` true ranges, then `(prev * (n - 1) + tr) / n`.
pub fn atr<T: OHLCV>(bars: &[T], period: usize) -> Vec<f64> {
    let tr = true_range(bars);
    let n = tr.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }

    let seed = tr[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    let mut prev = seed;
    for i in period..n {
        prev = (prev * (period as f64 - 1.0) + tr[i]) / period as f64;
        out[i] = prev;
    }
    out
}

/// Latest ATR value, if defined.
pub fn latest_atr<T: OHLCV>(bars: &[T], period: usize) -> Option<f64> {
    atr(bars, period).last().copied().filter(|v| v.is_finite())
}

/// Close series of a bar slice.
pub fn closes<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter().map(|b| b.close()).collect()
}

/// Mean of the `period` closes ending at `index` (inclusive).
pub fn sma_close_at<T: OHLCV>(bars: &[T], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index >= bars.len() || index + 1 < period {
        return None;
    }
    let window = &bars[index + 1 - period..=index];
    let sum: f64 = window.iter().map(|b| b.close()).sum();
    let avg = sum / period as f64;
    avg.is_finite().then_some(avg)
}

/// Mean of the finite values, `None` if there are none.
pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Median of the finite values, `None` if there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    Some(if finite.len() % 2 == 0 {
        (finite[mid - 1] + finite[mid]) / 2.0
    } else {
        finite[mid]
    })
}

/// Percentage change from `from` to `to`; `None` unless both are finite and
/// `from` is positive.
#[inline]
pub fn pct_change(from: f64, to: f64) -> Option<f64> {
    (from.is_finite() && to.is_finite() && from > 0.0).then(|| (to - from) * 100.0 / from)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bar(f64, f64, f64);

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.2
        }
        fn high(&self) -> f64 {
            self.0
        }
        fn low(&self) -> f64 {
            self.1
        }
        fn close(&self) -> f64 {
            self.2
        }
        fn volume(&self) -> f64 {
            0.0
        }
    }

    #[test]
    fn test_sma_warmup_and_values() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!((out[2] - 2.0).abs() < 1e-12);
        assert!((out[3] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sma_nan_in_window() {
        let out = sma(&[1.0, f64::NAN, 3.0, 4.0, 5.0], 2);
        assert!(out[1].is_nan());
        assert!(out[2].is_nan());
        assert!((out[4] - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_ema_seeded_by_first_value() {
        let out = ema(&[10.0, 10.0, 10.0], 9);
        assert!(out.iter().all(|v| (v - 10.0).abs() < 1e-12));

        let out = ema(&[10.0, 20.0], 3);
        // alpha = 0.5
        assert!((out[1] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_ema_skips_leading_nan() {
        let out = ema(&[f64::NAN, 4.0, f64::NAN, 4.0], 3);
        assert!(out[0].is_nan());
        assert_eq!(out[1], 4.0);
        assert_eq!(out[2], 4.0);
        assert_eq!(out[3], 4.0);
    }

    #[test]
    fn test_true_range_uses_prev_close() {
        let bars = [Bar(11.0, 9.0, 10.0), Bar(14.0, 12.0, 13.0)];
        let tr = true_range(&bars);
        assert_eq!(tr[0], 2.0);
        assert_eq!(tr[1], 4.0);
    }

    #[test]
    fn test_atr_wilder() {
        let bars: Vec<Bar> = (0..5).map(|_| Bar(11.0, 9.0, 10.0)).collect();
        let out = atr(&bars, 3);
        assert!(out[1].is_nan());
        assert!((out[2] - 2.0).abs() < 1e-12);
        assert!((out[4] - 2.0).abs() < 1e-12);
        assert_eq!(latest_atr(&bars, 3), Some(2.0));
        assert_eq!(latest_atr(&bars, 10), None);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[f64::NAN]), None);
    }

    #[test]
    fn test_mean_ignores_nan() {
        assert_eq!(mean(&[1.0, f64::NAN, 3.0]), Some(2.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(100.0, 110.0), Some(10.0));
        assert_eq!(pct_change(100.0, 105.0), Some(5.0));
        assert_eq!(pct_change(0.0, 110.0), None);
    }
}
