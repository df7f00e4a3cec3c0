//! Composite six-factor trade score and action label.
//!
//! | Factor | Max |
//! |---|---|
//! | Pattern | `pattern_max_points` (25) |
//! | Volume/spread | 25 |
//! | Trend alignment | 20 |
//! | Support/resistance | 15 |
//! | Relative strength | 15 |
//! | Liquidity | 10 |
//!
//! Every factor is bounded on its own and the total is clamped to 0..=100.
//! The resolver never fails: missing inputs fall back to a fixed sub-score
//! and leave a note on the breakdown.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    breadth::MarketState,
    config::{EngineConfig, VsaConflictMode},
    levels::SrLevels,
    rotation::{Quadrant, RotationReport},
    select_primary,
    strength::RsRatingTable,
    table::Membership,
    volume::{Pressure, VolumeContext, VolumeLevel},
    Direction, PatternKind, PatternMatch, PatternRole, Trend,
};

pub const VSA_MAX: f64 = 25.0;
pub const TREND_MAX: f64 = 20.0;
pub const LEVELS_MAX: f64 = 15.0;
pub const RS_MAX: f64 = 15.0;
pub const LIQUIDITY_MAX: f64 = 10.0;

/// Points when a factor's input is unavailable
const RS_MISSING: f64 = 6.0;
const TREND_NO_PATTERN: f64 = 8.0;
const TREND_NEUTRAL_PATTERN: f64 = 10.0;
/// Direction weight of a chart-structure pattern
const CHART_BIAS: i32 = 4;
/// Candle tier that can reverse a trend on its own
const CONFIRMED_REVERSAL_TIER: u8 = 5;
/// Rating-delta lag used by [`ScoringContext::lookup`]
pub const RS_DELTA_LAG: usize = 5;

// ============================================================
// LABELS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    /// Bullish trend, bearish short-term read that does not overturn it
    Pullback,
    /// Bearish trend, bullish short-term read that does not overturn it
    Bounce,
}

impl SignalDirection {
    /// Side a trade in this direction would take.
    #[inline]
    pub fn is_long(self) -> bool {
        matches!(self, SignalDirection::Buy | SignalDirection::Pullback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Avoid,
    Weak,
    Moderate,
    Good,
    Excellent,
}

impl QualityTier {
    pub fn from_score(total: f64) -> Self {
        if total >= 80.0 {
            QualityTier::Excellent
        } else if total >= 60.0 {
            QualityTier::Good
        } else if total >= 40.0 {
            QualityTier::Moderate
        } else if total >= 20.0 {
            QualityTier::Weak
        } else {
            QualityTier::Avoid
        }
    }
}

// ============================================================
// INPUTS
// ============================================================

/// Rotation read of the instrument's group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorContext {
    pub group: String,
    pub quadrant: Quadrant,
    /// 1-based rank by smoothed RS ratio on the date
    pub rank: Option<usize>,
    /// Groups ranked on the date
    pub group_count: usize,
}

/// Cross-sectional and market-level context for one (instrument, date)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringContext {
    pub rs_rating: Option<u8>,
    /// Rating change over the last five sessions
    pub rs_rating_delta: Option<i32>,
    pub sector: Option<SectorContext>,
    pub market_exposure_pct: Option<u8>,
}

impl ScoringContext {
    /// Gather the context for `symbol` on `date` from the market-level outputs
    /// that are available.
    pub fn lookup(
        symbol: &str,
        date: NaiveDate,
        ratings: Option<&RsRatingTable>,
        sectors: Option<(&Membership, &RotationReport)>,
        market: Option<&MarketState>,
    ) -> Self {
        let sector = sectors.and_then(|(membership, report)| {
            let group = membership.group_of(symbol)?;
            let point = report.point(group, date)?;
            let ranked = report.ranked_on(date);
            let rank = ranked
                .iter()
                .position(|p| p.entity == group)
                .map(|i| i + 1);
            Some(SectorContext {
                group: group.to_string(),
                quadrant: point.quadrant,
                rank,
                group_count: ranked.len(),
            })
        });

        Self {
            rs_rating: ratings.and_then(|t| t.rating(symbol, date)),
            rs_rating_delta: ratings.and_then(|t| t.rating_delta(symbol, date, RS_DELTA_LAG)),
            sector,
            market_exposure_pct: market.map(|m| m.exposure_pct),
        }
    }
}

/// Per-instrument leaf outputs on the scored bar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorInputs {
    /// Strongest candle-shape pattern
    pub candle: Option<PatternMatch>,
    /// Strongest chart-structure pattern
    pub chart: Option<PatternMatch>,
    pub trend: Trend,
    pub volume: Option<VolumeContext>,
    /// `None` when the levels are invalid or not computable
    pub levels: Option<SrLevels>,
    /// Average traded value over the liquidity window
    pub avg_traded_value: Option<f64>,
}

impl FactorInputs {
    /// Pattern that represents the bar.
    pub fn primary(&self) -> Option<PatternMatch> {
        select_primary(self.candle.iter().chain(self.chart.iter()))
    }
}

// ============================================================
// OUTPUT
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub symbol: String,
    pub date: Option<NaiveDate>,
    pub pattern: Option<PatternKind>,
    pub pattern_score: f64,
    pub volume_score: f64,
    /// Volume/spread sum before clamping; may be negative
    pub vsa_raw: f64,
    pub trend_score: f64,
    pub levels_score: f64,
    pub rs_score: f64,
    pub liquidity_score: f64,
    pub total_score: f64,
    pub quality: QualityTier,
    pub direction: Option<SignalDirection>,
    /// Net directional read; positive is bullish
    pub net_bias: i32,
    pub action: Action,
    pub computed: bool,
    pub notes: Vec<String>,
}

impl ScoreBreakdown {
    /// Placeholder for an instrument that could not be scored.
    pub fn not_computed(symbol: &str, date: Option<NaiveDate>, note: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            date,
            pattern: None,
            pattern_score: 0.0,
            volume_score: 0.0,
            vsa_raw: 0.0,
            trend_score: 0.0,
            levels_score: 0.0,
            rs_score: 0.0,
            liquidity_score: 0.0,
            total_score: 0.0,
            quality: QualityTier::Avoid,
            direction: None,
            net_bias: 0,
            action: Action::Wait,
            computed: false,
            notes: vec![note.into()],
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != Action::Wait
    }
}

// ============================================================
// RESOLVER
// ============================================================

/// Fuses the leaf outputs into a [`ScoreBreakdown`]
#[derive(Debug, Clone)]
pub struct SignalActionResolver {
    pub pattern_max_points: f64,
    pub action_score_threshold: f64,
    pub liquidity_min_notional: f64,
    pub invalid_levels_score: f64,
    pub vsa_conflict: VsaConflictMode,
    pub respect_market_exposure: bool,
}

impl Default for SignalActionResolver {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl SignalActionResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pattern_max_points: config.pattern_max_points,
            action_score_threshold: config.action_score_threshold,
            liquidity_min_notional: config.liquidity_min_notional,
            invalid_levels_score: config.invalid_levels_score,
            vsa_conflict: config.vsa_conflict,
            respect_market_exposure: config.respect_market_exposure,
        }
    }

    // ---- direction ----

    /// Direction label and net bias from candle, chart and trend reads.
    ///
    /// A short-term read against the trend is `Pullback` (uptrend) or
    /// `Bounce` (downtrend) unless it is a confirmed reversal.
    pub fn direction(inputs: &FactorInputs) -> (SignalDirection, i32) {
        let candle = inputs
            .candle
            .map_or(0, |m| m.direction.sign() * m.tier() as i32);
        let chart = inputs.chart.map_or(0, |m| m.direction.sign() * CHART_BIAS);
        let short = candle + chart;
        let trend = inputs.trend.bias();
        let net = short + trend;

        // Only a chart break or a top-tier candle turns a counter-trend read
        // into a reversal; anything weaker is a pullback or bounce.
        let against = |m: &PatternMatch| trend != 0 && m.direction.sign() == -trend.signum();
        let reversal = inputs.chart.as_ref().is_some_and(|m| against(m))
            || inputs
                .candle
                .as_ref()
                .is_some_and(|m| m.tier() >= CONFIRMED_REVERSAL_TIER && against(m));

        let direction = if trend > 0 && short < 0 && !reversal {
            SignalDirection::Pullback
        } else if trend < 0 && short > 0 && !reversal {
            SignalDirection::Bounce
        } else if net > 0 || (net == 0 && trend >= 0) {
            SignalDirection::Buy
        } else {
            SignalDirection::Sell
        };
        (direction, net)
    }

    // ---- factors ----

    pub fn pattern_points(&self, primary: Option<&PatternMatch>) -> f64 {
        primary.map_or(0.0, |m| {
            (m.tier() as f64 * 5.0).min(self.pattern_max_points)
        })
    }

    /// (clamped points, raw sum)
    pub fn vsa_points(&self, vol: &VolumeContext, long: bool) -> (f64, f64) {
        let volume = match vol.level {
            VolumeLevel::High => 10.0,
            VolumeLevel::Average => 6.0,
            VolumeLevel::Low => 2.0,
        };
        let spread = if vol.spread_ratio >= 1.2 {
            6.0
        } else if vol.spread_ratio >= 0.8 {
            4.0
        } else {
            1.0
        };
        let position = if long {
            vol.close_position
        } else {
            1.0 - vol.close_position
        };
        let close = if position >= 0.7 {
            6.0
        } else if position >= 0.5 {
            4.0
        } else if position >= 0.3 {
            2.0
        } else {
            0.0
        };

        let (agrees, conflicts) = match vol.pressure {
            Pressure::Demand => (long, !long),
            Pressure::Supply => (!long, long),
            Pressure::Neutral => (false, false),
        };
        let subtotal: f64 = volume + spread + close;

        let raw = match self.vsa_conflict {
            _ if agrees => subtotal + 3.0,
            VsaConflictMode::Additive if conflicts => subtotal - 5.0,
            VsaConflictMode::Multiplicative { factor } if conflicts => subtotal * factor,
            _ => subtotal,
        };
        (raw.clamp(0.0, VSA_MAX), raw)
    }

    /// Trend alignment of the primary pattern.
    pub fn trend_points(trend: Trend, primary: Option<&PatternMatch>) -> f64 {
        let Some(m) = primary else {
            return TREND_NO_PATTERN;
        };
        // Rows ordered StrongDown, Down, Sideways, Up, StrongUp
        const REVERSAL: [f64; 5] = [20.0, 18.0, 10.0, 5.0, 0.0];
        const CONTINUATION: [f64; 5] = [0.0, 5.0, 10.0, 18.0, 20.0];

        let col = (trend.bias() + 2) as usize;
        let row = match m.kind.role() {
            PatternRole::Continuation => &CONTINUATION,
            PatternRole::Reversal | PatternRole::Indecision => &REVERSAL,
        };
        match m.direction {
            Direction::Bullish => row[col],
            Direction::Bearish => row[4 - col],
            Direction::Neutral => TREND_NEUTRAL_PATTERN,
        }
    }

    /// Distance band scaled by reward:risk. `None` levels score the configured
    /// neutral value.
    pub fn levels_points(&self, levels: Option<&SrLevels>, long: bool) -> f64 {
        let Some(sr) = levels else {
            return self.invalid_levels_score;
        };
        let base: f64 = match sr.distance_for(long) {
            Some(d) if d <= 1.0 => 15.0,
            Some(d) if d <= 2.0 => 12.0,
            Some(d) if d <= 3.5 => 9.0,
            Some(d) if d <= 5.0 => 6.0,
            _ => 3.0,
        };
        let scale = match sr.reward_risk_for(long) {
            Some(rr) if rr >= 2.0 => 1.0,
            Some(rr) if rr >= 1.0 => 0.8,
            Some(_) => 0.5,
            None => 0.9,
        };
        (base * scale).clamp(0.0, LEVELS_MAX)
    }

    /// Rating band, rating momentum, sector quadrant and sector rank.
    pub fn rs_points(ctx: &ScoringContext, long: bool) -> f64 {
        let Some(rating) = ctx.rs_rating else {
            return RS_MISSING;
        };
        let effective = if long { rating } else { 100 - rating.min(99) };
        let band: f64 = match effective {
            90.. => 15.0,
            80..=89 => 12.0,
            70..=79 => 10.0,
            60..=69 => 8.0,
            50..=59 => 6.0,
            40..=49 => 4.0,
            _ => 2.0,
        };

        let delta = ctx
            .rs_rating_delta
            .map_or(0, |d| if long { d } else { -d });
        let momentum = match delta {
            d if d >= 5 => 2.0,
            d if d >= 2 => 1.0,
            d if d <= -5 => -2.0,
            d if d <= -2 => -1.0,
            _ => 0.0,
        };

        let sector = ctx.sector.as_ref().map_or(0.0, |s| {
            let quadrant = match s.quadrant {
                Quadrant::Leading => 1.0,
                Quadrant::Lagging => -1.0,
                _ => 0.0,
            };
            // Top-ranked group backs longs, bottom-ranked group backs shorts
            let extreme = if long { 1 } else { s.group_count };
            let rank = if s.group_count > 1 && s.rank == Some(extreme) {
                1.0
            } else {
                0.0
            };
            if long {
                quadrant + rank
            } else {
                rank - quadrant
            }
        });

        (band + momentum + sector).clamp(0.0, RS_MAX)
    }

    /// Linear in average traded value from zero, full at
    /// `liquidity_min_notional`.
    pub fn liquidity_points(&self, avg_traded_value: Option<f64>) -> f64 {
        let Some(value) = avg_traded_value.filter(|v| v.is_finite() && *v >= 0.0) else {
            return 0.0;
        };
        let threshold = self.liquidity_min_notional;
        if threshold <= 0.0 {
            return LIQUIDITY_MAX;
        }
        (LIQUIDITY_MAX * value / threshold).min(LIQUIDITY_MAX)
    }

    // ---- fusion ----

    pub fn resolve(
        &self,
        symbol: &str,
        date: Option<NaiveDate>,
        inputs: &FactorInputs,
        ctx: &ScoringContext,
    ) -> ScoreBreakdown {
        let mut notes = Vec::new();
        let primary = inputs.primary();
        let (direction, net) = Self::direction(inputs);
        let long = direction.is_long();

        let pattern_score = self.pattern_points(primary.as_ref());

        let (volume_score, vsa_raw) = match &inputs.volume {
            Some(vol) => self.vsa_points(vol, long),
            None => {
                notes.push("volume context unavailable".to_string());
                (0.0, 0.0)
            }
        };

        let trend_score = Self::trend_points(inputs.trend, primary.as_ref());

        if inputs.levels.is_none() {
            notes.push(format!(
                "support/resistance invalid; neutral {} points",
                self.invalid_levels_score
            ));
        }
        let levels_score = self.levels_points(inputs.levels.as_ref(), long);

        if ctx.rs_rating.is_none() {
            notes.push("no RS rating".to_string());
        }
        let rs_score = Self::rs_points(ctx, long);

        if inputs.avg_traded_value.is_none() {
            notes.push("traded value unavailable".to_string());
        }
        let liquidity_score = self.liquidity_points(inputs.avg_traded_value);

        let total_score = (pattern_score
            + volume_score
            + trend_score
            + levels_score
            + rs_score
            + liquidity_score)
            .clamp(0.0, 100.0);

        let mut action = match direction {
            _ if total_score < self.action_score_threshold || net == 0 => Action::Wait,
            SignalDirection::Buy => Action::Buy,
            SignalDirection::Sell => Action::Sell,
            SignalDirection::Pullback | SignalDirection::Bounce => Action::Wait,
        };
        if self.respect_market_exposure
            && action == Action::Buy
            && ctx.market_exposure_pct == Some(0)
        {
            notes.push("market exposure is 0%".to_string());
            action = Action::Wait;
        }

        ScoreBreakdown {
            symbol: symbol.to_string(),
            date,
            pattern: primary.map(|m| m.kind),
            pattern_score,
            volume_score,
            vsa_raw,
            trend_score,
            levels_score,
            rs_score,
            liquidity_score,
            total_score,
            quality: QualityTier::from_score(total_score),
            direction: Some(direction),
            net_bias: net,
            action,
            computed: true,
            notes,
        }
    }
}
