//! Pattern detectors
//!
//! Candle-shape detectors over the trailing 1–3 bars, and coarse chart-structure
//! detectors (breakouts, moving-average crosses) over longer windows.
//!
//! # Pattern Categories
//!
//! - **Single-bar**: doji family, spinning top, hammer family
//! - **Two-bar**: engulfing, harami, piercing line, dark cloud cover
//! - **Three-bar**: morning/evening star, three soldiers/crows
//! - **Chart**: breakout/breakdown, golden/death cross

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod chart;
pub mod single_bar;
pub mod three_bar;
pub mod two_bar;

pub use chart::*;
pub use helpers::*;
pub use single_bar::*;
pub use three_bar::*;
pub use two_bar::*;
