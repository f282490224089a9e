//! Market regime classification.
//!
//! The classifier is a pure function of the candle window: the Kaufman
//! efficiency ratio separates directional movement from noise, and per-bar
//! return volatility splits the non-trending share into range and volatile.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RegimeConfig;
use crate::exchange::Candle;
use crate::indicators::{sample_std, IndicatorError};
use crate::utils::to_f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Trend,
    Range,
    Volatile,
}

impl Regime {
    /// Tie-break order, highest priority first.
    pub const PRIORITY: [Regime; 3] = [Regime::Trend, Regime::Range, Regime::Volatile];
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Trend => write!(f, "trend"),
            Regime::Range => write!(f, "range"),
            Regime::Volatile => write!(f, "volatile"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeReading {
    pub regime: Regime,
    /// Score of the winning regime in [0, 1]
    pub confidence: f64,
    pub efficiency_ratio: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn required_bars(&self) -> usize {
        self.config.efficiency_period.max(self.config.volatility_period) + 1
    }

    pub fn classify(&self, candles: &[Candle]) -> Result<RegimeReading, IndicatorError> {
        let required = self.required_bars();
        if candles.len() < required {
            return Err(IndicatorError::InsufficientData {
                indicator: "regime",
                required,
                available: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();
        let er = efficiency_ratio(&closes, self.config.efficiency_period);
        let volatility = return_volatility(&closes, self.config.volatility_period);

        let vol_share = (volatility / self.config.volatile_threshold).min(1.0);
        let score = |regime: Regime| match regime {
            Regime::Trend => er,
            Regime::Range => (1.0 - er) * (1.0 - vol_share),
            Regime::Volatile => (1.0 - er) * vol_share,
        };

        let mut best = Regime::PRIORITY[0];
        let mut best_score = score(best);
        for regime in &Regime::PRIORITY[1..] {
            let s = score(*regime);
            if s > best_score {
                best = *regime;
                best_score = s;
            }
        }

        Ok(RegimeReading {
            regime: best,
            confidence: best_score,
            efficiency_ratio: er,
            volatility,
        })
    }
}

/// Net move over total path length across the last `period` bars.
fn efficiency_ratio(closes: &[f64], period: usize) -> f64 {
    let window = &closes[closes.len() - period - 1..];
    let net = (window[window.len() - 1] - window[0]).abs();
    let path: f64 = window.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if path == 0.0 {
        0.0
    } else {
        (net / path).clamp(0.0, 1.0)
    }
}

/// Sample stddev of simple returns over the last `period` bars.
fn return_volatility(closes: &[f64], period: usize) -> f64 {
    let window = &closes[closes.len() - period - 1..];
    let returns: Vec<f64> = window
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();
    sample_std(&returns)
}
