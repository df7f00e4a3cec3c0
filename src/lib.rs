//! # marketstate - Market State & Signal Scoring Engine
//!
//! Deterministic classifiers over daily equity series: breadth regime and
//! exposure, bottom-formation stages, relative-rotation quadrants, RS ratings
//! and a six-factor composite trade score.
//!
//! ## Quick Start
//!
//! ```rust
//! use marketstate::prelude::*;
//! use chrono::NaiveDate;
//!
//! let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! let bars: Vec<PriceBar> = (0..80)
//!     .map(|i| {
//!         let c = 100.0 + i as f64 * 0.5;
//!         let date = start + chrono::Days::new(i);
//!         PriceBar::new(date, c - 0.3, c + 1.0, c - 1.0, c, 1_000_000.0)
//!     })
//!     .collect();
//!
//! let engine = SignalEngine::builder().build().unwrap();
//! let score = engine.score("DEMO", &bars, &ScoringContext::default()).unwrap();
//! assert!((0.0..=100.0).contains(&score.total_score));
//! ```

pub mod bottom;
pub mod breadth;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod indicators;
pub mod levels;
pub mod rotation;
pub mod scoring;
pub mod strength;
pub mod table;
pub mod trend;
pub mod volume;

pub mod prelude {
    pub use crate::{
        // Market level
        bottom::{BottomFormationStateMachine, BottomStage},
        breadth::{
            attach_benchmark_emas, benchmark_emas, higher_low, BreadthRegimeDetector,
            BreadthSnapshot, HealthBand, MarketSignal, MarketState, Regime,
        },
        // Configuration
        config::{EngineConfig, ParamMeta, ParamType, VsaConflictMode},
        // Detectors
        detectors::*,
        // Pipeline
        engine::{score_parallel, ScoreError, ScoredInstrument, SignalEngine, SignalEngineBuilder},
        levels::{SrLevels, SupportResistanceLocator},
        rotation::{Quadrant, RotationClassifier, RotationPoint, RotationReport},
        scoring::{
            Action, FactorInputs, QualityTier, ScoreBreakdown, ScoringContext, SectorContext,
            SignalActionResolver, SignalDirection,
        },
        strength::{RelativeStrengthRater, RsRatingRecord, RsRatingTable},
        table::{CloseTable, Membership},
        trend::TrendClassifier,
        volume::{Pressure, VolumeContext, VolumeLevel, VolumeSpreadAnalyzer},
        // Patterns
        BuiltinDetector,
        ContextProvider,
        DefaultContextProvider,
        Direction,
        EngineBuilder,
        // Errors
        EngineError,
        MarketContext,
        OHLCVExt,
        PatternClass,
        PatternDetector,
        PatternEngine,
        PatternKind,
        PatternMatch,
        PatternRole,
        Period,
        PriceBar,
        Ratio,
        Result,
        Trend,
        OHLCV,
    };
}

use chrono::NaiveDate;

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the classifiers. Every variant is local to one
/// (instrument, date) unit of work.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient history: need {need} sessions, got {got}")]
    InsufficientHistory { need: usize, got: usize },

    #[error("Swing range {range:.4} narrower than required {min_range:.4}")]
    InvalidRange { range: f64, min_range: f64 },

    #[error("Missing benchmark value for {date}")]
    MissingBenchmark { date: NaiveDate },

    #[error("Invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: &'static str },

    #[error("{what}: expected length {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(EngineError::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(EngineError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Lookback length in sessions (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(EngineError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn date(&self) -> Option<NaiveDate> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn upper_shadow(&self) -> f64 {
        self.high() - self.open().max(self.close())
    }

    #[inline]
    fn lower_shadow(&self) -> f64 {
        self.open().min(self.close()) - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Traded value of the session (close * volume)
    #[inline]
    fn traded_value(&self) -> f64 {
        self.close() * self.volume()
    }

    /// Where the close sits inside the bar range: 0.0 at the low, 1.0 at the high.
    /// Returns None if range is zero
    #[inline]
    fn close_position(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| (self.close() - self.low()) / range)
    }

    /// Body as ratio of range. Returns None if range is zero
    #[inline]
    fn body_ratio(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| self.body() / range)
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close(), self.volume()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(EngineError::InvalidBar {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(EngineError::InvalidBar {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.low() {
            return Err(EngineError::InvalidBar {
                index: 0,
                reason: "high < low",
            });
        }
        if self.volume() < 0.0 {
            return Err(EngineError::InvalidBar {
                index: 0,
                reason: "negative volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// One trading session for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for PriceBar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn date(&self) -> Option<NaiveDate> {
        Some(self.date)
    }
}

// ============================================================
// PATTERN MATCH
// ============================================================

/// Priority class used to break ties when several patterns fire on one bar.
/// Declaration order is the priority order, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatternClass {
    Breakout,
    MultiCandleReversal,
    SingleCandle,
    MovingAverageCross,
    Indecision,
}

impl PatternClass {
    /// Higher is more important
    #[inline]
    pub fn priority(self) -> u8 {
        match self {
            PatternClass::Breakout => 5,
            PatternClass::MultiCandleReversal => 4,
            PatternClass::SingleCandle => 3,
            PatternClass::MovingAverageCross => 2,
            PatternClass::Indecision => 1,
        }
    }
}

/// What a pattern says about the prevailing trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PatternRole {
    Reversal,
    Continuation,
    Indecision,
}

macro_rules! define_pattern_kinds {
    (
        $(
            $variant:ident => ($name:literal, $tier:literal, $class:ident, $role:ident, $dir:expr)
        ),* $(,)?
    ) => {
        /// Closed library of named patterns: kind -> detector -> reliability tier
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum PatternKind {
            $($variant),*
        }

        impl PatternKind {
            pub const ALL: &'static [PatternKind] = &[$(PatternKind::$variant),*];

            #[inline]
            pub fn name(self) -> &'static str {
                match self {
                    $(PatternKind::$variant => $name),*
                }
            }

            /// Fixed reliability tier 1..=5 used by the scorer
            #[inline]
            pub fn tier(self) -> u8 {
                match self {
                    $(PatternKind::$variant => $tier),*
                }
            }

            #[inline]
            pub fn class(self) -> PatternClass {
                match self {
                    $(PatternKind::$variant => PatternClass::$class),*
                }
            }

            #[inline]
            pub fn role(self) -> PatternRole {
                match self {
                    $(PatternKind::$variant => PatternRole::$role),*
                }
            }

            /// Typical direction. `None` for context-dependent shapes (doji family).
            #[inline]
            pub fn typical_direction(self) -> Option<Direction> {
                match self {
                    $(PatternKind::$variant => $dir),*
                }
            }
        }
    };
}

define_pattern_kinds! {
    // Indecision
    Doji => ("doji", 1, Indecision, Indecision, None),
    SpinningTop => ("spinning_top", 1, Indecision, Indecision, Some(Direction::Neutral)),
    DragonflyDoji => ("dragonfly_doji", 2, SingleCandle, Reversal, Some(Direction::Bullish)),
    GravestoneDoji => ("gravestone_doji", 2, SingleCandle, Reversal, Some(Direction::Bearish)),

    // Single candle
    Hammer => ("hammer", 3, SingleCandle, Reversal, Some(Direction::Bullish)),
    InvertedHammer => ("inverted_hammer", 2, SingleCandle, Reversal, Some(Direction::Bullish)),
    HangingMan => ("hanging_man", 3, SingleCandle, Reversal, Some(Direction::Bearish)),
    ShootingStar => ("shooting_star", 3, SingleCandle, Reversal, Some(Direction::Bearish)),

    // Two bar
    BullishEngulfing => ("bullish_engulfing", 4, MultiCandleReversal, Reversal, Some(Direction::Bullish)),
    BearishEngulfing => ("bearish_engulfing", 4, MultiCandleReversal, Reversal, Some(Direction::Bearish)),
    BullishHarami => ("bullish_harami", 2, MultiCandleReversal, Reversal, Some(Direction::Bullish)),
    BearishHarami => ("bearish_harami", 2, MultiCandleReversal, Reversal, Some(Direction::Bearish)),
    PiercingLine => ("piercing_line", 4, MultiCandleReversal, Reversal, Some(Direction::Bullish)),
    DarkCloudCover => ("dark_cloud_cover", 4, MultiCandleReversal, Reversal, Some(Direction::Bearish)),

    // Three bar
    MorningStar => ("morning_star", 5, MultiCandleReversal, Reversal, Some(Direction::Bullish)),
    EveningStar => ("evening_star", 5, MultiCandleReversal, Reversal, Some(Direction::Bearish)),
    ThreeWhiteSoldiers => ("three_white_soldiers", 5, MultiCandleReversal, Continuation, Some(Direction::Bullish)),
    ThreeBlackCrows => ("three_black_crows", 5, MultiCandleReversal, Continuation, Some(Direction::Bearish)),

    // Chart structure
    Breakout => ("breakout", 4, Breakout, Continuation, Some(Direction::Bullish)),
    Breakdown => ("breakdown", 4, Breakout, Continuation, Some(Direction::Bearish)),
    GoldenCross => ("golden_cross", 3, MovingAverageCross, Continuation, Some(Direction::Bullish)),
    DeathCross => ("death_cross", 3, MovingAverageCross, Continuation, Some(Direction::Bearish)),
}

impl PatternKind {
    /// Chart-structure patterns (breakouts and MA crosses) as opposed to candle shapes.
    #[inline]
    pub fn is_chart(self) -> bool {
        matches!(
            self.class(),
            PatternClass::Breakout | PatternClass::MovingAverageCross
        )
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction/bias of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Bullish,
    Neutral,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    /// +1 / 0 / -1
    #[inline]
    pub fn sign(self) -> i32 {
        match self {
            Direction::Bullish => 1,
            Direction::Neutral => 0,
            Direction::Bearish => -1,
        }
    }
}

/// One detected pattern, located by bar index
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub direction: Direction,
    /// Detector-reported magnitude 0.0..=1.0
    pub strength: f64,
    pub start_index: usize,
    pub end_index: usize,
}

impl PatternMatch {
    #[inline]
    pub fn tier(&self) -> u8 {
        self.kind.tier()
    }

    /// Ordering key: priority class first, then magnitude.
    fn outranks(&self, other: &PatternMatch) -> bool {
        match self.kind.class().priority().cmp(&other.kind.class().priority()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.strength > other.strength,
        }
    }
}

/// Pick the single pattern that represents a bar when several fire together.
pub fn select_primary<'a, I>(matches: I) -> Option<PatternMatch>
where
    I: IntoIterator<Item = &'a PatternMatch>,
{
    matches.into_iter().fold(None, |best: Option<PatternMatch>, m| match best {
        Some(b) if !m.outranks(&b) => Some(b),
        _ => Some(*m),
    })
}

// ============================================================
// MARKET CONTEXT
// ============================================================

/// Trend state from price deviation against short/medium moving averages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    StrongUp,
    Up,
    #[default]
    Sideways,
    Down,
    StrongDown,
}

impl Trend {
    #[inline]
    pub fn is_down(self) -> bool {
        matches!(self, Trend::Down | Trend::StrongDown)
    }

    #[inline]
    pub fn is_up(self) -> bool {
        matches!(self, Trend::Up | Trend::StrongUp)
    }

    /// Signed weight of the trend: +2 / +1 / 0 / -1 / -2
    #[inline]
    pub fn bias(self) -> i32 {
        match self {
            Trend::StrongUp => 2,
            Trend::Up => 1,
            Trend::Sideways => 0,
            Trend::Down => -1,
            Trend::StrongDown => -2,
        }
    }
}

/// Market context at a specific bar
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketContext {
    pub trend: Trend,
    /// Trend at the previous bar, used for context-aware doji reads
    pub prior_trend: Trend,
    /// Average volume over the trailing window, excluding the bar itself
    pub avg_volume: f64,
    /// Average body size over the trailing candle window
    pub avg_body: f64,
    /// Average range (high - low) over the trailing candle window
    pub avg_range: f64,
    /// Average range over a 5-bar trailing window, for near/far comparisons
    pub avg_range_5: f64,
}

/// Computes the per-bar trend and averages detectors read
pub trait ContextProvider: Send + Sync {
    fn compute_all<T: OHLCV>(&self, bars: &[T]) -> Vec<MarketContext>;
}

/// Default context provider: SMA-deviation trend plus trailing candle averages
#[derive(Debug, Clone)]
pub struct DefaultContextProvider {
    pub trend: trend::TrendClassifier,
    pub volume_period: Period,
    pub candle_period: Period,
}

impl Default for DefaultContextProvider {
    fn default() -> Self {
        Self {
            trend: trend::TrendClassifier::default(),
            volume_period: Period::new_const(20),
            candle_period: Period::new_const(10),
        }
    }
}

impl ContextProvider for DefaultContextProvider {
    fn compute_all<T: OHLCV>(&self, bars: &[T]) -> Vec<MarketContext> {
        let trends = self.trend.classify_series(bars);
        let candle_period = self.candle_period.get();

        let mut contexts = Vec::with_capacity(bars.len());
        for i in 0..bars.len() {
            // Averages use bars strictly before i; bar 0 falls back to itself.
            let (avg_body, avg_range) = if i == 0 {
                (bars[0].body(), bars[0].range())
            } else {
                let trail = &bars[i.saturating_sub(candle_period)..i];
                let n = trail.len() as f64;
                let (sum_body, sum_range) = trail
                    .iter()
                    .fold((0.0, 0.0), |(b, r), bar| (b + bar.body(), r + bar.range()));
                (sum_body / n, sum_range / n)
            };

            let avg_range_5 = if i == 0 {
                bars[0].range()
            } else {
                detectors::helpers::trailing_avg_range(bars, i, 5)
            };

            contexts.push(MarketContext {
                trend: trends[i],
                prior_trend: if i == 0 { Trend::Sideways } else { trends[i - 1] },
                avg_volume: self.compute_avg_volume(bars, i),
                avg_body,
                avg_range,
                avg_range_5,
            });
        }

        contexts
    }
}

impl DefaultContextProvider {
    fn compute_avg_volume<T: OHLCV>(&self, bars: &[T], index: usize) -> f64 {
        if index == 0 {
            return bars[0].volume();
        }
        let trail = &bars[index.saturating_sub(self.volume_period.get())..index];
        trail.iter().map(|b| b.volume()).sum::<f64>() / trail.len() as f64
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// Pattern detector over a bar slice. One detector may emit more than one
/// [`PatternKind`] (e.g. bullish and bearish engulfing).
pub trait PatternDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn min_bars(&self) -> usize;
    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch, no vtable
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect<T: OHLCV>(
                &self,
                bars: &[T],
                index: usize,
                ctx: &MarketContext,
            ) -> Option<PatternMatch> {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, bars, index, ctx)),*
                }
            }

            #[inline]
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(d) => PatternDetector::name(d)),*
                }
            }

            #[inline]
            pub fn min_bars(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::min_bars(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    // Single bar
    Doji(DojiDetector),
    DragonflyDoji(DragonflyDojiDetector),
    GravestoneDoji(GravestoneDojiDetector),
    SpinningTop(SpinningTopDetector),
    Hammer(HammerDetector),
    InvertedHammer(InvertedHammerDetector),
    HangingMan(HangingManDetector),
    ShootingStar(ShootingStarDetector),

    // Two bar
    Engulfing(EngulfingDetector),
    Harami(HaramiDetector),
    Piercing(PiercingDetector),
    DarkCloudCover(DarkCloudCoverDetector),

    // Three bar
    MorningStar(MorningStarDetector),
    EveningStar(EveningStarDetector),
    ThreeWhiteSoldiers(ThreeWhiteSoldiersDetector),
    ThreeBlackCrows(ThreeBlackCrowsDetector),

    // Chart structure
    Breakout(BreakoutDetector),
    MaCrossover(MaCrossoverDetector),
}

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Pattern engine configuration
#[derive(Debug, Clone, Default)]
pub struct PatternEngineConfig {
    pub min_strength: Option<f64>,
    pub validate_data: bool,
    pub pattern_filter: Option<Vec<PatternKind>>,
}

/// Runs the builtin pattern library over a bar series
#[derive(Debug, Clone)]
pub struct PatternEngine<C: ContextProvider = DefaultContextProvider> {
    builtin: Vec<BuiltinDetector>,
    context_provider: C,
    config: PatternEngineConfig,
}

impl<C: ContextProvider> PatternEngine<C> {
    pub fn new(context_provider: C) -> Self {
        Self {
            builtin: Vec::new(),
            context_provider,
            config: PatternEngineConfig::default(),
        }
    }

    /// Number of registered detectors
    pub fn detector_count(&self) -> usize {
        self.builtin.len()
    }

    pub fn context_provider(&self) -> &C {
        &self.context_provider
    }

    /// Precompute contexts for all bars.
    #[inline]
    pub fn compute_contexts<T: OHLCV>(&self, bars: &[T]) -> Vec<MarketContext> {
        self.context_provider.compute_all(bars)
    }

    /// Detect patterns at a single bar index.
    pub fn scan_at<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Vec<PatternMatch> {
        let mut results = Vec::new();
        for detector in &self.builtin {
            if index + 1 < detector.min_bars() {
                continue;
            }
            if let Some(m) = detector.detect(bars, index, ctx) {
                if self.should_include(&m) {
                    results.push(m);
                }
            }
        }
        results
    }

    /// Highest-priority pattern on a bar (priority class, then magnitude).
    pub fn primary_at<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        ctx: &MarketContext,
    ) -> Option<PatternMatch> {
        select_primary(&self.scan_at(bars, index, ctx))
    }

    /// Scan all bars and return flat list of patterns.
    pub fn scan<T: OHLCV>(&self, bars: &[T]) -> Result<Vec<PatternMatch>> {
        if self.config.validate_data {
            validate_bars(bars)?;
        }

        let contexts = self.compute_contexts(bars);
        let mut results = Vec::new();
        for (i, ctx) in contexts.iter().enumerate() {
            results.extend(self.scan_at(bars, i, ctx));
        }
        Ok(results)
    }

    /// Scan and return patterns grouped by bar index.
    pub fn scan_grouped<T: OHLCV>(&self, bars: &[T]) -> Result<Vec<Vec<PatternMatch>>> {
        if self.config.validate_data {
            validate_bars(bars)?;
        }

        let contexts = self.compute_contexts(bars);
        Ok(contexts
            .iter()
            .enumerate()
            .map(|(i, ctx)| self.scan_at(bars, i, ctx))
            .collect())
    }

    #[inline]
    pub fn validates_data(&self) -> bool {
        self.config.validate_data
    }

    fn should_include(&self, m: &PatternMatch) -> bool {
        if let Some(min) = self.config.min_strength {
            if m.strength < min {
                return false;
            }
        }
        if let Some(ref filter) = self.config.pattern_filter {
            if !filter.contains(&m.kind) {
                return false;
            }
        }
        true
    }

    fn validate(&self) -> Result<()> {
        for d in &self.builtin {
            d.validate_config()?;
        }
        Ok(())
    }
}

/// Check every bar, reporting the first invalid index.
pub fn validate_bars<T: OHLCV>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            EngineError::InvalidBar { reason, .. } => EngineError::InvalidBar { index: i, reason },
            other => other,
        })?;
    }
    Ok(())
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
#[derive(Debug, Clone)]
pub struct EngineBuilder<C: ContextProvider = DefaultContextProvider> {
    context_provider: C,
    builtin: Vec<BuiltinDetector>,
    config: PatternEngineConfig,
}

impl Default for EngineBuilder<DefaultContextProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder<DefaultContextProvider> {
    pub fn new() -> Self {
        Self {
            context_provider: DefaultContextProvider::default(),
            builtin: Vec::new(),
            config: PatternEngineConfig::default(),
        }
    }
}

/// Generate an array of `BuiltinDetector` variants using `Default::default()` for each inner type.
macro_rules! builtin_defaults {
  ($($variant:ident),* $(,)?) => {
    [$(BuiltinDetector::$variant(Default::default())),*]
  };
}

impl<C: ContextProvider> EngineBuilder<C> {
    /// Change context provider
    pub fn context_provider<C2: ContextProvider>(self, provider: C2) -> EngineBuilder<C2> {
        EngineBuilder {
            context_provider: provider,
            builtin: self.builtin,
            config: self.config,
        }
    }

    /// Add the whole builtin library with default configurations
    pub fn with_all_defaults(self) -> Self {
        self.with_single_bar_defaults()
            .with_two_bar_defaults()
            .with_three_bar_defaults()
            .with_chart_defaults()
    }

    /// Single-bar shapes (8)
    pub fn with_single_bar_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            Doji,
            DragonflyDoji,
            GravestoneDoji,
            SpinningTop,
            Hammer,
            InvertedHammer,
            HangingMan,
            ShootingStar,
        ]);
        self
    }

    /// Two-bar shapes (4 detectors, 6 kinds)
    pub fn with_two_bar_defaults(mut self) -> Self {
        self.builtin
            .extend(builtin_defaults![Engulfing, Harami, Piercing, DarkCloudCover]);
        self
    }

    /// Three-bar shapes (4)
    pub fn with_three_bar_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            MorningStar,
            EveningStar,
            ThreeWhiteSoldiers,
            ThreeBlackCrows,
        ]);
        self
    }

    /// Chart structure: breakout/breakdown and MA crossover
    pub fn with_chart_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![Breakout, MaCrossover]);
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.builtin.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Set minimum strength filter
    pub fn min_strength(mut self, strength: f64) -> Self {
        self.config.min_strength = Some(strength);
        self
    }

    /// Enable/disable data validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.validate_data = enable;
        self
    }

    /// Filter to specific patterns only
    pub fn only_patterns(mut self, kinds: impl IntoIterator<Item = PatternKind>) -> Self {
        self.config.pattern_filter = Some(kinds.into_iter().collect());
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine<C>> {
        let engine = PatternEngine {
            builtin: self.builtin,
            context_provider: self.context_provider,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

/// Default engine with DefaultContextProvider
pub type DefaultPatternEngine = PatternEngine<DefaultContextProvider>;

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Bar {
        o: f64,
        h: f64,
        l: f64,
        c: f64,
        v: f64,
    }

    impl Bar {
        fn new(o: f64, h: f64, l: f64, c: f64) -> Self {
            Self {
                o,
                h,
                l,
                c,
                v: 1000.0,
            }
        }
    }

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.o
        }

        fn high(&self) -> f64 {
            self.h
        }

        fn low(&self) -> f64 {
            self.l
        }

        fn close(&self) -> f64 {
            self.c
        }

        fn volume(&self) -> f64 {
            self.v
        }
    }

    fn make_downtrend_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 200.0 - i as f64 * 2.0;
                Bar::new(base, base + 1.0, base - 1.0, base - 0.5)
            })
            .collect()
    }

    fn matched(kind: PatternKind, strength: f64) -> PatternMatch {
        PatternMatch {
            kind,
            direction: kind.typical_direction().unwrap_or(Direction::Neutral),
            strength,
            start_index: 0,
            end_index: 0,
        }
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_ohlcv_ext() {
        let bar = Bar::new(100.0, 110.0, 90.0, 105.0);
        assert_eq!(bar.body(), 5.0);
        assert_eq!(bar.range(), 20.0);
        assert!(bar.is_bullish());
        assert!((bar.close_position().unwrap() - 0.75).abs() < 1e-12);
        assert!((bar.body_ratio().unwrap() - 0.25).abs() < 1e-12);
        assert_eq!(bar.traded_value(), 105_000.0);
    }

    #[test]
    fn test_close_position_flat_bar() {
        let bar = Bar::new(100.0, 100.0, 100.0, 100.0);
        assert!(bar.close_position().is_none());
    }

    #[test]
    fn test_validate_bars_reports_index() {
        let bars = vec![
            Bar::new(100.0, 101.0, 99.0, 100.5),
            Bar::new(100.0, 98.0, 99.0, 100.5),
        ];
        assert_eq!(
            validate_bars(&bars),
            Err(EngineError::InvalidBar {
                index: 1,
                reason: "high < low"
            })
        );
    }

    #[test]
    fn test_pattern_tiers_in_range() {
        for kind in PatternKind::ALL {
            assert!((1..=5).contains(&kind.tier()), "{kind} tier out of range");
        }
        assert_eq!(PatternKind::MorningStar.tier(), 5);
        assert_eq!(PatternKind::Doji.tier(), 1);
    }

    #[test]
    fn test_select_primary_prefers_class_over_strength() {
        let doji = matched(PatternKind::Doji, 0.99);
        let hammer = matched(PatternKind::Hammer, 0.5);
        let engulfing = matched(PatternKind::BullishEngulfing, 0.6);
        let breakout = matched(PatternKind::Breakout, 0.4);
        let cross = matched(PatternKind::GoldenCross, 0.9);

        let all = [doji, hammer, cross, engulfing, breakout];
        assert_eq!(select_primary(&all).unwrap().kind, PatternKind::Breakout);

        let no_breakout = [doji, cross, hammer, engulfing];
        assert_eq!(
            select_primary(&no_breakout).unwrap().kind,
            PatternKind::BullishEngulfing
        );

        let low = [doji, cross];
        assert_eq!(select_primary(&low).unwrap().kind, PatternKind::GoldenCross);
        assert!(select_primary(&Vec::<PatternMatch>::new()).is_none());
    }

    #[test]
    fn test_select_primary_magnitude_within_class() {
        let weak = matched(PatternKind::Hammer, 0.5);
        let strong = matched(PatternKind::ShootingStar, 0.8);
        assert_eq!(
            select_primary(&[weak, strong]).unwrap().kind,
            PatternKind::ShootingStar
        );
    }

    #[test]
    fn test_engine_builder() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        assert_eq!(engine.detector_count(), 18);
    }

    #[test]
    fn test_empty_scan() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars: Vec<Bar> = vec![];
        assert!(engine.scan(&bars).unwrap().is_empty());
    }

    #[test]
    fn test_compute_contexts_trend() {
        let engine = EngineBuilder::new().build().unwrap();
        let bars = make_downtrend_bars(60);
        let contexts = engine.compute_contexts(&bars);
        assert_eq!(contexts.len(), bars.len());
        assert_eq!(contexts[0].trend, Trend::Sideways);
        assert_eq!(contexts[59].trend, Trend::StrongDown);
        assert_eq!(contexts[59].prior_trend, Trend::StrongDown);
    }

    #[test]
    fn test_avg_volume_excludes_current_bar() {
        let mut bars = make_downtrend_bars(25);
        bars[24].v = 50_000.0;
        let contexts = DefaultContextProvider::default().compute_all(&bars);
        assert!((contexts[24].avg_volume - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_filter() {
        let engine = EngineBuilder::new()
            .with_single_bar_defaults()
            .only_patterns([PatternKind::Hammer])
            .build()
            .unwrap();

        let bars = vec![Bar::new(100.0, 110.0, 90.0, 100.05)]; // doji shape
        let patterns = engine.scan(&bars).unwrap();
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_min_strength_filter() {
        let engine = EngineBuilder::new()
            .add(BuiltinDetector::Doji(DojiDetector::with_defaults()))
            .min_strength(1.01)
            .build()
            .unwrap();

        let bars = vec![Bar::new(100.0, 110.0, 90.0, 100.0)];
        assert!(engine.scan(&bars).unwrap().is_empty());
    }

    #[test]
    fn test_validate_data_rejects_bad_bar() {
        let engine = EngineBuilder::new()
            .with_single_bar_defaults()
            .validate_data(true)
            .build()
            .unwrap();
        let bars = vec![Bar::new(100.0, 101.0, 99.0, f64::NAN)];
        assert!(engine.scan(&bars).is_err());
    }

    #[test]
    fn test_scan_grouped_len() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars = make_downtrend_bars(30);
        let grouped = engine.scan_grouped(&bars).unwrap();
        assert_eq!(grouped.len(), bars.len());
    }
}
