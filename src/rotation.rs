//! Relative-rotation quadrants for a universe of entities against a benchmark.
//!
//! Pipeline:
//! 1. per entity: raw ratio `price / benchmark` on every usable date (map)
//! 2. per date: cross-sectional median of the raw ratios (barrier)
//! 3. per entity: normalized ratio, momentum, smoothing, quadrant (map)
//!
//! Dates where the benchmark is missing or non-positive are dropped from the
//! axis for every entity, so lags and smoothing windows count usable sessions.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    indicators,
    table::{CloseTable, Membership},
    EngineError, Period, Result,
};

/// Position on the relative-rotation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quadrant {
    Leading,
    Weakening,
    Lagging,
    Improving,
}

impl Quadrant {
    /// Quadrant of a smoothed (ratio, momentum) pair. Ratios are centred on 1.0.
    #[inline]
    pub fn from_pair(rs_ratio: f64, rs_momentum: f64) -> Self {
        match (rs_ratio > 1.0, rs_momentum > 0.0) {
            (true, true) => Quadrant::Leading,
            (true, false) => Quadrant::Weakening,
            (false, false) => Quadrant::Lagging,
            (false, true) => Quadrant::Improving,
        }
    }

    /// Next quadrant in the usual clockwise rotation.
    #[inline]
    pub fn next(self) -> Self {
        match self {
            Quadrant::Improving => Quadrant::Leading,
            Quadrant::Leading => Quadrant::Weakening,
            Quadrant::Weakening => Quadrant::Lagging,
            Quadrant::Lagging => Quadrant::Improving,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationPoint {
    pub entity: String,
    pub date: NaiveDate,
    pub rs_ratio: f64,
    pub rs_ratio_smoothed: f64,
    pub rs_momentum: f64,
    pub rs_momentum_smoothed: f64,
    pub quadrant: Quadrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationClassifier {
    pub momentum_lag: Period,
    pub smooth_period: Period,
}

impl Default for RotationClassifier {
    fn default() -> Self {
        Self {
            momentum_lag: Period::new_const(5),
            smooth_period: Period::new_const(3),
        }
    }
}

impl RotationClassifier {
    pub fn new(momentum_lag: usize, smooth_period: usize) -> Result<Self> {
        Ok(Self {
            momentum_lag: Period::new(momentum_lag)?,
            smooth_period: Period::new(smooth_period)?,
        })
    }

    /// Usable sessions before the first point can be emitted.
    pub fn warmup(&self) -> usize {
        self.momentum_lag.get() + self.smooth_period.get()
    }

    /// Classify every entity of `table` against `benchmark` (aligned with the
    /// table's dates).
    pub fn classify(&self, table: &CloseTable, benchmark: &[f64]) -> Result<RotationReport> {
        if benchmark.len() != table.len() {
            return Err(EngineError::LengthMismatch {
                what: "benchmark",
                expected: table.len(),
                got: benchmark.len(),
            });
        }

        let mut usable = Vec::with_capacity(table.len());
        let mut skipped_dates = Vec::new();
        for (t, (&date, &b)) in table.dates().iter().zip(benchmark).enumerate() {
            if b.is_finite() && b > 0.0 {
                usable.push(t);
            } else {
                let err = EngineError::MissingBenchmark { date };
                tracing::warn!(%date, "{err}; date skipped for every entity");
                skipped_dates.push(date);
            }
        }

        let entities: Vec<(&str, &[f64])> = table.iter().collect();

        // Phase 1: raw ratios on the usable axis
        let raw: Vec<Vec<f64>> = entities
            .par_iter()
            .map(|(_, closes)| {
                usable
                    .iter()
                    .map(|&t| {
                        let p = closes[t];
                        if p.is_finite() && p > 0.0 {
                            p / benchmark[t]
                        } else {
                            f64::NAN
                        }
                    })
                    .collect()
            })
            .collect();

        // Phase 2: cross-sectional median per usable date
        let medians: Vec<f64> = (0..usable.len())
            .into_par_iter()
            .map(|k| {
                let day: Vec<f64> = raw.iter().map(|r| r[k]).collect();
                indicators::median(&day)
                    .filter(|m| *m > 0.0)
                    .unwrap_or(f64::NAN)
            })
            .collect();

        // Phase 3: normalize, momentum, smooth, classify
        let lag = self.momentum_lag.get();
        let smooth = self.smooth_period.get();
        let dates = table.dates();

        let mut points: Vec<RotationPoint> = entities
            .par_iter()
            .zip(raw.par_iter())
            .flat_map_iter(|((entity, _), raw)| {
                let ratio: Vec<f64> = raw.iter().zip(&medians).map(|(r, m)| r / m).collect();
                let momentum: Vec<f64> = (0..ratio.len())
                    .map(|k| match k.checked_sub(lag) {
                        Some(j) => (ratio[k] - ratio[j]) * 100.0,
                        None => f64::NAN,
                    })
                    .collect();
                let ratio_s = indicators::sma(&ratio, smooth);
                let momentum_s = indicators::sma(&momentum, smooth);

                (0..ratio.len())
                    .filter(|&k| ratio_s[k].is_finite() && momentum_s[k].is_finite())
                    .map(|k| RotationPoint {
                        entity: entity.to_string(),
                        date: dates[usable[k]],
                        rs_ratio: ratio[k],
                        rs_ratio_smoothed: ratio_s[k],
                        rs_momentum: momentum[k],
                        rs_momentum_smoothed: momentum_s[k],
                        quadrant: Quadrant::from_pair(ratio_s[k], momentum_s[k]),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        points.sort_by(|a, b| a.entity.cmp(&b.entity).then(a.date.cmp(&b.date)));
        tracing::debug!(
            entities = entities.len(),
            points = points.len(),
            skipped = skipped_dates.len(),
            "rotation classified"
        );

        Ok(RotationReport {
            points,
            skipped_dates,
        })
    }

    /// Classify equal-weight group indices built from member closes.
    pub fn classify_groups(
        &self,
        table: &CloseTable,
        membership: &Membership,
        benchmark: &[f64],
    ) -> Result<RotationReport> {
        let groups = table.group_table(membership)?;
        self.classify(&groups, benchmark)
    }
}

/// Rotation points for every entity, ordered by entity then date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationReport {
    pub points: Vec<RotationPoint>,
    /// Dates dropped for a missing benchmark
    pub skipped_dates: Vec<NaiveDate>,
}

impl RotationReport {
    fn entity_points(&self, entity: &str) -> &[RotationPoint] {
        let start = self.points.partition_point(|p| p.entity.as_str() < entity);
        let end = self.points.partition_point(|p| p.entity.as_str() <= entity);
        &self.points[start..end]
    }

    pub fn latest(&self, entity: &str) -> Option<&RotationPoint> {
        self.entity_points(entity).last()
    }

    pub fn point(&self, entity: &str, date: NaiveDate) -> Option<&RotationPoint> {
        self.entity_points(entity).iter().find(|p| p.date == date)
    }

    /// Last `len` points of `entity`, oldest first.
    pub fn trail(&self, entity: &str, len: usize) -> &[RotationPoint] {
        let pts = self.entity_points(entity);
        &pts[pts.len().saturating_sub(len)..]
    }

    /// Whether the trail only stays put or advances one step clockwise.
    pub fn trail_is_canonical(&self, entity: &str, len: usize) -> bool {
        self.trail(entity, len)
            .windows(2)
            .all(|w| w[1].quadrant == w[0].quadrant || w[1].quadrant == w[0].quadrant.next())
    }

    /// Latest point of every entity, strongest smoothed ratio first.
    pub fn ranked(&self) -> Vec<&RotationPoint> {
        let mut latest: Vec<&RotationPoint> = self
            .points
            .chunk_by(|a, b| a.entity == b.entity)
            .filter_map(|chunk| chunk.last())
            .collect();
        latest.sort_by(|a, b| b.rs_ratio_smoothed.total_cmp(&a.rs_ratio_smoothed));
        latest
    }

    /// Points on `date`, strongest smoothed ratio first.
    pub fn ranked_on(&self, date: NaiveDate) -> Vec<&RotationPoint> {
        let mut day: Vec<&RotationPoint> = self.points.iter().filter(|p| p.date == date).collect();
        day.sort_by(|a, b| b.rs_ratio_smoothed.total_cmp(&a.rs_ratio_smoothed));
        day
    }

    pub fn entities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.points.iter().map(|p| p.entity.as_str()).collect();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        (0..n as u64).map(|i| start + chrono::Days::new(i)).collect()
    }

    fn table(n: usize) -> CloseTable {
        let grow = |r: f64| (0..n).map(|i| 100.0 * (1.0 + r).powi(i as i32)).collect();
        CloseTable::new(dates(n))
            .unwrap()
            .with_column("UP", grow(0.01))
            .unwrap()
            .with_column("FLAT", grow(0.0))
            .unwrap()
            .with_column("DOWN", grow(-0.01))
            .unwrap()
    }

    #[test]
    fn test_quadrant_from_pair() {
        assert_eq!(Quadrant::from_pair(1.02, 0.5), Quadrant::Leading);
        assert_eq!(Quadrant::from_pair(1.02, 0.0), Quadrant::Weakening);
        assert_eq!(Quadrant::from_pair(1.0, -0.1), Quadrant::Lagging);
        assert_eq!(Quadrant::from_pair(0.98, 0.1), Quadrant::Improving);
    }

    #[test]
    fn test_cycle() {
        let mut q = Quadrant::Improving;
        for _ in 0..4 {
            q = q.next();
        }
        assert_eq!(q, Quadrant::Improving);
    }

    #[test]
    fn test_leader_and_laggard() {
        let n = 20;
        let bench = vec![100.0; n];
        let report = RotationClassifier::default().classify(&table(n), &bench).unwrap();

        assert_eq!(report.latest("UP").unwrap().quadrant, Quadrant::Leading);
        assert_eq!(report.latest("DOWN").unwrap().quadrant, Quadrant::Lagging);
        // The median entity sits exactly on 1.0
        assert!((report.latest("FLAT").unwrap().rs_ratio - 1.0).abs() < 1e-12);

        let ranked = report.ranked();
        assert_eq!(ranked[0].entity, "UP");
        assert_eq!(ranked[2].entity, "DOWN");
    }

    #[test]
    fn test_warmup_and_point_count() {
        let n = 20;
        let report = RotationClassifier::default()
            .classify(&table(n), &vec![100.0; n])
            .unwrap();
        // First momentum at k=5, first smoothed momentum at k=7
        assert_eq!(report.trail("UP", usize::MAX).len(), n - 7);
        assert_eq!(report.entities(), vec!["DOWN", "FLAT", "UP"]);
    }

    #[test]
    fn test_missing_benchmark_skips_date() {
        let n = 20;
        let mut bench = vec![100.0; n];
        bench[10] = f64::NAN;
        bench[11] = 0.0;
        let t = table(n);
        let report = RotationClassifier::default().classify(&t, &bench).unwrap();
        assert_eq!(report.skipped_dates, vec![t.dates()[10], t.dates()[11]]);
        assert!(report.point("UP", t.dates()[10]).is_none());
        assert_eq!(report.trail("UP", usize::MAX).len(), n - 2 - 7);
    }

    #[test]
    fn test_length_mismatch() {
        let err = RotationClassifier::default()
            .classify(&table(10), &[100.0; 9])
            .unwrap_err();
        assert!(matches!(err, EngineError::LengthMismatch { .. }));
    }

    #[test]
    fn test_trail_is_canonical() {
        let n = 20;
        let report = RotationClassifier::default()
            .classify(&table(n), &vec![100.0; n])
            .unwrap();
        assert!(report.trail_is_canonical("UP", 5));
        assert_eq!(report.trail("UP", 5).len(), 5);
    }

    #[test]
    fn test_groups() {
        let mut m = Membership::default();
        m.insert("G1", vec!["UP".into()]);
        m.insert("G2", vec!["DOWN".into(), "FLAT".into()]);
        let n = 20;
        let report = RotationClassifier::default()
            .classify_groups(&table(n), &m, &vec![100.0; n])
            .unwrap();
        assert_eq!(report.entities(), vec!["G1", "G2"]);
        assert_eq!(report.ranked()[0].entity, "G1");
    }
}
