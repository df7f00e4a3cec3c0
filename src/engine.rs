//! Per-instrument scoring pipeline and its parallel fan-out.
//!
//! One [`SignalEngine::score`] call runs the leaf detectors on the latest bar
//! of an instrument and hands their outputs to the [`SignalActionResolver`].

use rayon::prelude::*;

use crate::{
    config::EngineConfig,
    indicators,
    levels::SupportResistanceLocator,
    scoring::{FactorInputs, ScoreBreakdown, ScoringContext, SignalActionResolver},
    select_primary, validate_bars,
    volume::VolumeSpreadAnalyzer,
    EngineBuilder, EngineError, OHLCVExt, PatternEngine, PatternMatch, Result, OHLCV,
};

/// Sessions averaged for the liquidity factor
pub const LIQUIDITY_PERIOD: usize = 20;

// ============================================================
// ENGINE
// ============================================================

#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: EngineConfig,
    patterns: PatternEngine,
    volume: VolumeSpreadAnalyzer,
    levels: SupportResistanceLocator,
    resolver: SignalActionResolver,
}

impl SignalEngine {
    pub fn builder() -> SignalEngineBuilder {
        SignalEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &SignalActionResolver {
        &self.resolver
    }

    /// Bars needed before every leaf reads real history: the configured
    /// `min_history`, the medium trend SMA on the last two bars (candle
    /// direction reads the prior bar's trend), the levels lookback and the
    /// volume baseline.
    pub fn min_bars(&self) -> usize {
        let trend = &self.patterns.context_provider().trend;
        self.config
            .min_history
            .max(trend.medium_period.get() + 1)
            .max(self.levels.min_history())
            .max(self.volume.period.get() + 1)
    }

    /// Leaf outputs on the last bar. `bars` must be non-empty.
    pub fn factor_inputs<T: OHLCV>(&self, symbol: &str, bars: &[T]) -> FactorInputs {
        let Some(last) = bars.len().checked_sub(1) else {
            return FactorInputs::default();
        };
        let contexts = self.patterns.compute_contexts(bars);
        let matches = self.patterns.scan_at(bars, last, &contexts[last]);

        let (chart, candle): (Vec<PatternMatch>, Vec<PatternMatch>) =
            matches.into_iter().partition(|m| m.kind.is_chart());

        let volume = match self.volume.analyze(bars) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(symbol, error = %e, "volume context skipped");
                None
            }
        };

        let levels = match self.levels.locate(bars) {
            Ok(l) => Some(l),
            Err(e) => {
                tracing::debug!(symbol, error = %e, "support/resistance invalid");
                None
            }
        };

        let traded: Vec<f64> = bars[bars.len().saturating_sub(LIQUIDITY_PERIOD)..]
            .iter()
            .map(|b| b.traded_value())
            .collect();

        FactorInputs {
            candle: select_primary(&candle),
            chart: select_primary(&chart),
            trend: contexts[last].trend,
            volume,
            levels,
            avg_traded_value: indicators::mean(&traded),
        }
    }

    /// Score the latest bar of one instrument.
    ///
    /// Invalid bars are an error. Too little history is not: the breakdown
    /// comes back with `computed == false` and a note.
    pub fn score<T: OHLCV>(
        &self,
        symbol: &str,
        bars: &[T],
        ctx: &ScoringContext,
    ) -> Result<ScoreBreakdown> {
        validate_bars(bars)?;
        let date = bars.last().and_then(|b| b.date());

        let need = self.min_bars();
        if bars.len() < need {
            let err = EngineError::InsufficientHistory {
                need,
                got: bars.len(),
            };
            tracing::debug!(symbol, "score not computed: {err}");
            return Ok(ScoreBreakdown::not_computed(symbol, date, err.to_string()));
        }

        let inputs = self.factor_inputs(symbol, bars);
        let breakdown = self.resolver.resolve(symbol, date, &inputs, ctx);
        tracing::trace!(
            symbol,
            total = breakdown.total_score,
            action = ?breakdown.action,
            "scored"
        );
        Ok(breakdown)
    }
}

// ============================================================
// BUILDER
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct SignalEngineBuilder {
    config: EngineConfig,
    volume: Option<VolumeSpreadAnalyzer>,
    levels: Option<SupportResistanceLocator>,
    min_pattern_strength: Option<f64>,
}

impl SignalEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn volume_analyzer(mut self, analyzer: VolumeSpreadAnalyzer) -> Self {
        self.volume = Some(analyzer);
        self
    }

    pub fn levels_locator(mut self, locator: SupportResistanceLocator) -> Self {
        self.levels = Some(locator);
        self
    }

    /// Ignore pattern matches weaker than `strength`
    pub fn min_pattern_strength(mut self, strength: f64) -> Self {
        self.min_pattern_strength = Some(strength);
        self
    }

    pub fn build(self) -> Result<SignalEngine> {
        self.config.validate()?;

        let volume = self.volume.unwrap_or_default();
        volume.validate()?;
        let levels = self.levels.unwrap_or_default();
        levels.validate()?;

        let mut patterns = EngineBuilder::new().with_all_defaults();
        if let Some(strength) = self.min_pattern_strength {
            patterns = patterns.min_strength(strength);
        }

        Ok(SignalEngine {
            resolver: SignalActionResolver::new(&self.config),
            patterns: patterns.build()?,
            volume,
            levels,
            config: self.config,
        })
    }
}

// ============================================================
// PARALLEL SCORING
// ============================================================

/// Score of one instrument
#[derive(Debug, Clone)]
pub struct ScoredInstrument {
    pub symbol: String,
    pub breakdown: ScoreBreakdown,
}

/// Error from scoring one instrument
#[derive(Debug, Clone)]
pub struct ScoreError {
    pub symbol: String,
    pub error: EngineError,
}

/// Score many instruments in parallel. `context` supplies the cross-sectional
/// context of each symbol.
///
/// Successes come back best total first (symbol breaks ties); failures keep
/// input order.
pub fn score_parallel<'a, T, I, F>(
    engine: &SignalEngine,
    instruments: I,
    context: F,
) -> (Vec<ScoredInstrument>, Vec<ScoreError>)
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T])>,
    F: Fn(&str) -> ScoringContext + Sync,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, bars)| {
            engine
                .score(symbol, bars, &context(symbol))
                .map(|breakdown| ScoredInstrument {
                    symbol: symbol.to_string(),
                    breakdown,
                })
                .map_err(|error| ScoreError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => {
                tracing::warn!(symbol = %e.symbol, error = %e.error, "instrument not scored");
                errors.push(e);
            }
        }
    }

    successes.sort_by(|a, b| {
        b.breakdown
            .total_score
            .total_cmp(&a.breakdown.total_score)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    (successes, errors)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{scoring::Action, PriceBar, Trend};

    fn rising(n: usize) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.5;
                PriceBar::new(start + chrono::Days::new(i as u64), c - 0.3, c + 1.0, c - 1.0, c, 1e6)
            })
            .collect()
    }

    #[test]
    fn test_short_history_not_computed() {
        let engine = SignalEngine::builder().build().unwrap();
        let b = engine
            .score("X", &rising(10), &ScoringContext::default())
            .unwrap();
        assert!(!b.computed);
        assert_eq!(b.action, Action::Wait);
        assert_eq!(b.total_score, 0.0);
        assert!(b.notes[0].contains("need 51"));
    }

    /// Falls two points a session from 200
    fn falling(n: usize) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let c = 200.0 - i as f64 * 2.0;
                PriceBar::new(start + chrono::Days::new(i as u64), c + 1.0, c + 1.5, c - 0.5, c, 1e6)
            })
            .collect()
    }

    #[test]
    fn test_no_score_before_trend_window() {
        let engine = SignalEngine::builder().build().unwrap();
        assert_eq!(engine.min_bars(), 51);

        let b = engine
            .score("X", &falling(40), &ScoringContext::default())
            .unwrap();
        assert!(!b.computed);
        assert_eq!(b.direction, None);
        assert_eq!(b.trend_score, 0.0);
        assert!(b.notes[0].contains("need 51"));
    }

    #[test]
    fn test_min_history_cannot_undercut_leaves() {
        let config = EngineConfig {
            min_history: 10,
            ..Default::default()
        };
        let engine = SignalEngine::builder().config(config).build().unwrap();
        assert_eq!(engine.min_bars(), 51);

        let b = engine
            .score("X", &falling(50), &ScoringContext::default())
            .unwrap();
        assert!(!b.computed);

        let bars = falling(51);
        let b = engine
            .score("X", &bars, &ScoringContext::default())
            .unwrap();
        assert!(b.computed);
        assert_eq!(engine.factor_inputs("X", &bars).trend, Trend::StrongDown);
    }

    #[test]
    fn test_invalid_bar_is_error() {
        let engine = SignalEngine::builder().build().unwrap();
        let mut bars = rising(40);
        bars[12].low = bars[12].high + 1.0;
        let err = engine
            .score("X", &bars, &ScoringContext::default())
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidBar {
                index: 12,
                reason: "high < low"
            }
        );
    }

    #[test]
    fn test_rising_series_scores() {
        let engine = SignalEngine::builder().build().unwrap();
        let bars = rising(80);
        let b = engine
            .score("X", &bars, &ScoringContext::default())
            .unwrap();
        assert!(b.computed);
        assert_eq!(b.date, Some(bars[79].date));
        assert!((0.0..=100.0).contains(&b.total_score));

        let inputs = engine.factor_inputs("X", &bars);
        assert!(inputs.trend.is_up());
        assert!(inputs.volume.is_some());
        assert!((inputs.avg_traded_value.unwrap() - bars[79].close * 1e6).abs() < 1e8);
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let config = EngineConfig {
            pattern_max_points: 40.0,
            ..Default::default()
        };
        assert!(SignalEngine::builder().config(config).build().is_err());
    }

    #[test]
    fn test_score_parallel_splits_errors() {
        let engine = SignalEngine::builder().build().unwrap();
        let good = rising(60);
        let short = rising(5);
        let mut bad = rising(60);
        bad[3].volume = -1.0;

        let universe: Vec<(&str, &[PriceBar])> = vec![
            ("GOOD", good.as_slice()),
            ("SHORT", short.as_slice()),
            ("BAD", bad.as_slice()),
        ];
        let (ok, errors) = score_parallel(&engine, universe, |_| ScoringContext::default());

        assert_eq!(ok.len(), 2);
        assert_eq!(ok[0].symbol, "GOOD");
        assert!(!ok[1].breakdown.computed);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "BAD");
    }
}
