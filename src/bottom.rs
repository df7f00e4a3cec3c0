//! Bottom-formation stages after a breadth washout.
//!
//! The stage is recomputed from the trailing window on every call; nothing
//! is carried between dates.

use serde::{Deserialize, Serialize};

use crate::{
    breadth::{higher_low, BreadthSnapshot},
    EngineError, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BottomStage {
    Capitulation,
    Accumulating,
    EarlyReversal,
}

impl BottomStage {
    /// Next stage in the usual progression; `None` after early reversal.
    pub fn next(self) -> Option<Self> {
        match self {
            BottomStage::Capitulation => Some(BottomStage::Accumulating),
            BottomStage::Accumulating => Some(BottomStage::EarlyReversal),
            BottomStage::EarlyReversal => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BottomFormationStateMachine {
    /// Higher-low window in sessions
    pub window: usize,
    /// `pct_above_ma50` at or above this leaves bottom tracking
    pub exit_ma50: f64,
    pub capitulation_below: f64,
    pub accumulation_below: f64,
    pub early_reversal_ma20: f64,
}

impl Default for BottomFormationStateMachine {
    fn default() -> Self {
        Self {
            window: 5,
            exit_ma50: 50.0,
            capitulation_below: 25.0,
            accumulation_below: 30.0,
            early_reversal_ma20: 25.0,
        }
    }
}

impl BottomFormationStateMachine {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(EngineError::InvalidValue("bottom window must be > 0"));
        }
        if self.capitulation_below > self.accumulation_below {
            return Err(EngineError::InvalidConfig(format!(
                "bottom: capitulation_below ({}) above accumulation_below ({})",
                self.capitulation_below, self.accumulation_below
            )));
        }
        Ok(())
    }

    /// Stage on the latest snapshot of `history`, most advanced stage first.
    pub fn stage(&self, history: &[BreadthSnapshot]) -> Option<BottomStage> {
        let snap = history.last()?;
        if snap.pct_above_ma50 >= self.exit_ma50 {
            return None;
        }

        let ma20: Vec<f64> = history.iter().map(|s| s.pct_above_ma20).collect();
        let hl20 = higher_low(&ma20, self.window);

        if snap.pct_above_ma20 >= self.early_reversal_ma20 && hl20 && self.ma50_holding(history) {
            Some(BottomStage::EarlyReversal)
        } else if snap.max_pct() < self.accumulation_below && hl20 {
            Some(BottomStage::Accumulating)
        } else if snap.max_pct() < self.capitulation_below && !hl20 {
            Some(BottomStage::Capitulation)
        } else {
            None
        }
    }

    /// MA50 breadth no longer making new lows over the window.
    fn ma50_holding(&self, history: &[BreadthSnapshot]) -> bool {
        let w = self.window;
        if history.len() < 2 * w {
            return false;
        }
        let tail = &history[history.len() - 2 * w..];
        if tail.iter().any(|s| !s.pct_above_ma50.is_finite()) {
            return false;
        }
        let min = |s: &[BreadthSnapshot]| {
            s.iter()
                .map(|b| b.pct_above_ma50)
                .fold(f64::INFINITY, f64::min)
        };
        let (previous, last) = tail.split_at(w);
        min(last) >= min(previous)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn series(ma20: &[f64], ma50: &[f64], ma100: f64) -> Vec<BreadthSnapshot> {
        let start = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        ma20.iter()
            .zip(ma50)
            .enumerate()
            .map(|(i, (&a, &b))| {
                BreadthSnapshot::new(start + chrono::Days::new(i as u64), a, b, ma100)
            })
            .collect()
    }

    #[test]
    fn test_progression() {
        assert_eq!(
            BottomStage::Capitulation.next(),
            Some(BottomStage::Accumulating)
        );
        assert_eq!(BottomStage::EarlyReversal.next(), None);
    }

    #[test]
    fn test_capitulation_without_history() {
        let m = BottomFormationStateMachine::default();
        let h = series(&[12.0], &[15.0], 20.0);
        assert_eq!(m.stage(&h), Some(BottomStage::Capitulation));
    }

    #[test]
    fn test_accumulating() {
        let m = BottomFormationStateMachine::default();
        let ma20 = [10.0, 8.0, 9.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0];
        let ma50 = [20.0, 19.0, 18.0, 17.0, 16.0, 15.0, 14.0, 13.0, 12.0, 11.0];
        let h = series(&ma20, &ma50, 20.0);
        assert_eq!(m.stage(&h), Some(BottomStage::Accumulating));
    }

    #[test]
    fn test_early_reversal() {
        let m = BottomFormationStateMachine::default();
        let ma20 = [15.0, 14.0, 16.0, 18.0, 20.0, 22.0, 24.0, 26.0, 27.0, 28.0];
        let ma50 = [20.0, 19.0, 19.0, 20.0, 21.0, 21.0, 22.0, 23.0, 24.0, 25.0];
        let h = series(&ma20, &ma50, 30.0);
        assert_eq!(m.stage(&h), Some(BottomStage::EarlyReversal));
    }

    #[test]
    fn test_falling_ma50_blocks_early_reversal() {
        let m = BottomFormationStateMachine::default();
        let ma20 = [15.0, 14.0, 16.0, 18.0, 20.0, 22.0, 24.0, 26.0, 27.0, 28.0];
        let ma50 = [20.0, 19.0, 19.0, 20.0, 21.0, 21.0, 20.0, 18.0, 16.0, 15.0];
        let h = series(&ma20, &ma50, 30.0);
        assert_eq!(m.stage(&h), None);
    }

    #[test]
    fn test_none_once_ma50_recovers() {
        let m = BottomFormationStateMachine::default();
        let h = series(&[10.0], &[55.0], 20.0);
        assert_eq!(m.stage(&h), None);
    }
}
