//! Engine configuration and tunable-parameter metadata.
//!
//! [`EngineConfig`] is plain serde data with defaults for every field, so a
//! TOML file only needs the options it overrides:
//!
//! ```rust
//! use marketstate::config::{EngineConfig, VsaConflictMode};
//!
//! let cfg = EngineConfig::from_toml(r#"
//!     action_score_threshold = 55.0
//!     vsa_conflict = { mode = "multiplicative", factor = 0.4 }
//! "#).unwrap();
//! assert_eq!(cfg.action_score_threshold, 55.0);
//! assert_eq!(cfg.vsa_conflict, VsaConflictMode::Multiplicative { factor: 0.4 });
//! assert_eq!(cfg.higher_low_window_ma20, 7);
//! ```

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    bottom::BottomFormationStateMachine, breadth::BreadthRegimeDetector,
    rotation::RotationClassifier, EngineError, Period, Result,
};

// ============================================================
// PARAMETER METADATA
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Fraction, usually within 0.0..=1.0
    Ratio,
    /// Session count (positive integer)
    Period,
    /// Score points or notional amounts
    Float,
}

/// Metadata for a single tunable
#[derive(Debug, Clone)]
pub struct ParamMeta {
    pub name: &'static str,
    pub param_type: ParamType,
    pub default: f64,
    /// Range for sweeps: (min, max, step)
    pub range: (f64, f64, f64),
    pub description: &'static str,
}

impl ParamMeta {
    pub const fn ratio(
        name: &'static str,
        default: f64,
        range: (f64, f64, f64),
        description: &'static str,
    ) -> Self {
        Self {
            name,
            param_type: ParamType::Ratio,
            default,
            range,
            description,
        }
    }

    pub const fn period(
        name: &'static str,
        default: f64,
        range: (f64, f64, f64),
        description: &'static str,
    ) -> Self {
        Self {
            name,
            param_type: ParamType::Period,
            default,
            range,
            description,
        }
    }

    pub const fn float(
        name: &'static str,
        default: f64,
        range: (f64, f64, f64),
        description: &'static str,
    ) -> Self {
        Self {
            name,
            param_type: ParamType::Float,
            default,
            range,
            description,
        }
    }

    /// All values of the sweep range, inclusive.
    pub fn generate_grid(&self) -> Vec<f64> {
        let (min, max, step) = self.range;
        if step <= 0.0 {
            return vec![min];
        }
        let steps = ((max - min) / step + 1e-9).floor() as usize;
        (0..=steps).map(|i| min + step * i as f64).collect()
    }

    pub fn validate(&self, value: f64) -> Result<()> {
        let (min, max, _) = self.range;
        if !value.is_finite() || value < min || value > max {
            return Err(EngineError::OutOfRange {
                field: self.name,
                value,
                min,
                max,
            });
        }
        if self.param_type == ParamType::Period && (value < 1.0 || value.fract() != 0.0) {
            return Err(EngineError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
    }
}

const PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio("ema_margin", 0.005, (0.0, 0.02, 0.0025), "Neutral band around the long benchmark EMA"),
    ParamMeta::period("higher_low_window_ma20", 7.0, (3.0, 15.0, 1.0), "Higher-low window on MA20 breadth"),
    ParamMeta::period("higher_low_window_ma50", 9.0, (3.0, 15.0, 1.0), "Higher-low window on MA50 breadth"),
    ParamMeta::period("bottom_window", 5.0, (3.0, 10.0, 1.0), "Higher-low window of the bottom stages"),
    ParamMeta::period("rotation_smooth_period", 3.0, (1.0, 10.0, 1.0), "SMA length for ratio and momentum"),
    ParamMeta::period("rotation_momentum_lag_days", 5.0, (1.0, 20.0, 1.0), "Lag of the rotation momentum"),
    ParamMeta::float("liquidity_min_notional", 10_000_000.0, (0.0, 1e10, 5_000_000.0), "Average traded value for full liquidity points"),
    ParamMeta::float("action_score_threshold", 50.0, (0.0, 100.0, 5.0), "Minimum total for Buy/Sell"),
    ParamMeta::float("pattern_max_points", 25.0, (15.0, 25.0, 5.0), "Cap of the pattern factor"),
    ParamMeta::float("invalid_levels_score", 7.0, (0.0, 15.0, 1.0), "Support/resistance points when levels are invalid"),
    ParamMeta::period("min_history", 50.0, (2.0, 260.0, 1.0), "Bars required before an instrument is scored"),
];

// ============================================================
// VSA CONFLICT MODE
// ============================================================

/// How a volume read that contradicts the trade direction is penalized
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VsaConflictMode {
    /// Fixed point penalty added to the sub-total
    #[default]
    Additive,
    /// Sub-total scaled by `factor` on conflict
    Multiplicative { factor: f64 },
}

// ============================================================
// ENGINE CONFIG
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ema_margin: f64,
    pub higher_low_window_ma20: usize,
    pub higher_low_window_ma50: usize,
    pub bottom_window: usize,
    pub rotation_smooth_period: usize,
    pub rotation_momentum_lag_days: usize,
    pub liquidity_min_notional: f64,
    pub action_score_threshold: f64,
    pub pattern_max_points: f64,
    pub invalid_levels_score: f64,
    pub min_history: usize,
    pub vsa_conflict: VsaConflictMode,
    /// Downgrade Buy to Wait when the market allows no exposure
    pub respect_market_exposure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ema_margin: 0.005,
            higher_low_window_ma20: 7,
            higher_low_window_ma50: 9,
            bottom_window: 5,
            rotation_smooth_period: 3,
            rotation_momentum_lag_days: 5,
            liquidity_min_notional: 10_000_000.0,
            action_score_threshold: 50.0,
            pattern_max_points: 25.0,
            invalid_levels_score: 7.0,
            min_history: 50,
            vsa_conflict: VsaConflictMode::Additive,
            respect_market_exposure: false,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidConfig(format!("read config file: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content)
            .map_err(|e| EngineError::InvalidConfig(format!("parse config TOML: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn param_meta() -> &'static [ParamMeta] {
        PARAMS
    }

    /// Defaults overridden by `params`; unknown keys are rejected.
    pub fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let mut cfg = Self::default();
        for (&key, &value) in params {
            let meta = PARAMS
                .iter()
                .find(|m| m.name == key)
                .ok_or_else(|| EngineError::InvalidConfig(format!("unknown parameter `{key}`")))?;
            meta.validate(value)?;
            match key {
                "ema_margin" => cfg.ema_margin = value,
                "higher_low_window_ma20" => cfg.higher_low_window_ma20 = value as usize,
                "higher_low_window_ma50" => cfg.higher_low_window_ma50 = value as usize,
                "bottom_window" => cfg.bottom_window = value as usize,
                "rotation_smooth_period" => cfg.rotation_smooth_period = value as usize,
                "rotation_momentum_lag_days" => cfg.rotation_momentum_lag_days = value as usize,
                "liquidity_min_notional" => cfg.liquidity_min_notional = value,
                "action_score_threshold" => cfg.action_score_threshold = value,
                "pattern_max_points" => cfg.pattern_max_points = value,
                "invalid_levels_score" => cfg.invalid_levels_score = value,
                "min_history" => cfg.min_history = value as usize,
                other => {
                    return Err(EngineError::InvalidConfig(format!(
                        "parameter `{other}` has no config field"
                    )))
                }
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, f64); 11] = [
            ("ema_margin", self.ema_margin),
            ("higher_low_window_ma20", self.higher_low_window_ma20 as f64),
            ("higher_low_window_ma50", self.higher_low_window_ma50 as f64),
            ("bottom_window", self.bottom_window as f64),
            ("rotation_smooth_period", self.rotation_smooth_period as f64),
            ("rotation_momentum_lag_days", self.rotation_momentum_lag_days as f64),
            ("liquidity_min_notional", self.liquidity_min_notional),
            ("action_score_threshold", self.action_score_threshold),
            ("pattern_max_points", self.pattern_max_points),
            ("invalid_levels_score", self.invalid_levels_score),
            ("min_history", self.min_history as f64),
        ];
        for (name, value) in checks {
            if let Some(meta) = PARAMS.iter().find(|m| m.name == name) {
                meta.validate(value)?;
            }
        }
        if let VsaConflictMode::Multiplicative { factor } = self.vsa_conflict {
            if !(0.0..=1.0).contains(&factor) {
                return Err(EngineError::OutOfRange {
                    field: "vsa_conflict.factor",
                    value: factor,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }
        Ok(())
    }

    /// Breadth regime detector with this config's margins and windows.
    pub fn breadth_detector(&self) -> BreadthRegimeDetector {
        BreadthRegimeDetector {
            ema_margin: self.ema_margin,
            higher_low_window_ma20: self.higher_low_window_ma20,
            higher_low_window_ma50: self.higher_low_window_ma50,
            bottom: BottomFormationStateMachine {
                window: self.bottom_window,
                ..Default::default()
            },
        }
    }

    pub fn rotation_classifier(&self) -> Result<RotationClassifier> {
        Ok(RotationClassifier {
            momentum_lag: Period::new(self.rotation_momentum_lag_days)?,
            smooth_period: Period::new(self.rotation_smooth_period)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_every_param_has_a_field() {
        for meta in EngineConfig::param_meta() {
            let mut params = HashMap::new();
            params.insert(meta.name, meta.default);
            assert_eq!(
                EngineConfig::with_params(&params).unwrap(),
                EngineConfig::default(),
                "{}",
                meta.name
            );
        }
    }

    #[test]
    fn test_with_params_overrides() {
        let mut params = HashMap::new();
        params.insert("action_score_threshold", 60.0);
        params.insert("rotation_smooth_period", 5.0);
        let cfg = EngineConfig::with_params(&params).unwrap();
        assert_eq!(cfg.action_score_threshold, 60.0);
        assert_eq!(cfg.rotation_smooth_period, 5);
    }

    #[test]
    fn test_with_params_rejects() {
        let mut params = HashMap::new();
        params.insert("nope", 1.0);
        assert!(EngineConfig::with_params(&params).is_err());

        let mut params = HashMap::new();
        params.insert("rotation_smooth_period", 2.5);
        assert!(EngineConfig::with_params(&params).is_err());

        let mut params = HashMap::new();
        params.insert("pattern_max_points", 30.0);
        assert!(matches!(
            EngineConfig::with_params(&params),
            Err(EngineError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_generate_grid() {
        let meta = ParamMeta::ratio("test", 0.5, (0.3, 0.7, 0.2), "Test");
        let grid = meta.generate_grid();
        assert_eq!(grid.len(), 3);
        assert!((grid[2] - 0.7).abs() < 1e-12);

        let windows = EngineConfig::param_meta()
            .iter()
            .find(|m| m.name == "higher_low_window_ma20")
            .unwrap()
            .generate_grid();
        assert_eq!(windows.first(), Some(&3.0));
        assert_eq!(windows.last(), Some(&15.0));
    }

    #[test]
    fn test_toml_partial_and_invalid() {
        let cfg = EngineConfig::from_toml("ema_margin = 0.01\nrespect_market_exposure = true").unwrap();
        assert_eq!(cfg.ema_margin, 0.01);
        assert!(cfg.respect_market_exposure);
        assert_eq!(cfg.vsa_conflict, VsaConflictMode::Additive);

        assert!(EngineConfig::from_toml("ema_margin = 0.5").is_err());
        assert!(EngineConfig::from_toml("vsa_conflict = { mode = \"multiplicative\", factor = 2.0 }").is_err());
        assert!(EngineConfig::from_toml("ema_margin = \"wide\"").is_err());
    }

    #[test]
    fn test_component_builders() {
        let cfg = EngineConfig {
            bottom_window: 4,
            rotation_smooth_period: 2,
            ..Default::default()
        };
        assert_eq!(cfg.breadth_detector().bottom.window, 4);
        assert_eq!(cfg.rotation_classifier().unwrap().smooth_period.get(), 2);
    }
}
