//! Volume/spread classification of the latest bar.
//!
//! Relative volume is measured against the average of the bars *before* the
//! one being classified, so a spike does not dilute its own baseline.

use serde::{Deserialize, Serialize};

use crate::{EngineError, OHLCVExt, Period, Result, OHLCV};

/// Relative-volume bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeLevel {
    High,
    Average,
    Low,
}

/// Which side the bar's volume appears to favour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pressure {
    Demand,
    Supply,
    Neutral,
}

/// Volume and spread read for one bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeContext {
    pub level: VolumeLevel,
    /// Current volume / trailing average volume
    pub relative_volume: f64,
    /// Current range / trailing average range
    pub spread_ratio: f64,
    /// Close within the bar range, 0.0 at the low and 1.0 at the high
    pub close_position: f64,
    pub pressure: Pressure,
    /// Very high volume on a wide spread
    pub climactic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSpreadAnalyzer {
    pub period: Period,
    pub high_threshold: f64,
    pub average_threshold: f64,
    pub climactic_volume: f64,
    pub climactic_spread: f64,
}

impl Default for VolumeSpreadAnalyzer {
    fn default() -> Self {
        Self {
            period: Period::new_const(20),
            high_threshold: 1.5,
            average_threshold: 0.8,
            climactic_volume: 2.5,
            climactic_spread: 1.5,
        }
    }
}

impl VolumeSpreadAnalyzer {
    pub fn validate(&self) -> Result<()> {
        if !(self.average_threshold > 0.0 && self.high_threshold > self.average_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "volume: require 0 < average_threshold ({}) < high_threshold ({})",
                self.average_threshold, self.high_threshold
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn level(&self, relative_volume: f64) -> VolumeLevel {
        if relative_volume >= self.high_threshold {
            VolumeLevel::High
        } else if relative_volume >= self.average_threshold {
            VolumeLevel::Average
        } else {
            VolumeLevel::Low
        }
    }

    /// Classify the last bar of `bars`.
    pub fn analyze<T: OHLCV>(&self, bars: &[T]) -> Result<VolumeContext> {
        match bars.len() {
            0 => Err(EngineError::InsufficientHistory {
                need: self.period.get() + 1,
                got: 0,
            }),
            n => self.analyze_at(bars, n - 1),
        }
    }

    /// Classify the bar at `index` against the `period` bars before it.
    pub fn analyze_at<T: OHLCV>(&self, bars: &[T], index: usize) -> Result<VolumeContext> {
        let period = self.period.get();
        if index < period || index >= bars.len() {
            return Err(EngineError::InsufficientHistory {
                need: period + 1,
                got: bars.len().min(index + 1),
            });
        }

        let bar = &bars[index];
        let trail = &bars[index - period..index];
        let avg_volume = trail.iter().map(|b| b.volume()).sum::<f64>() / period as f64;
        let avg_range = trail.iter().map(|b| b.range()).sum::<f64>() / period as f64;

        if !(avg_volume.is_finite() && avg_volume > 0.0) {
            return Err(EngineError::InvalidValue("average volume must be positive"));
        }

        let relative_volume = bar.volume() / avg_volume;
        let spread_ratio = if avg_range > 0.0 {
            bar.range() / avg_range
        } else {
            1.0
        };
        let close_position = bar.close_position().unwrap_or(0.5);
        let level = self.level(relative_volume);

        let pressure = match level {
            VolumeLevel::Low => Pressure::Neutral,
            _ if close_position >= 0.6 => Pressure::Demand,
            _ if close_position <= 0.4 => Pressure::Supply,
            _ => Pressure::Neutral,
        };

        Ok(VolumeContext {
            level,
            relative_volume,
            spread_ratio,
            close_position,
            pressure,
            climactic: relative_volume >= self.climactic_volume
                && spread_ratio >= self.climactic_spread,
        })
    }
}
