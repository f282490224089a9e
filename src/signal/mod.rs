//! Weighted vote of the indicator signals into one composite score.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::config::SignalWeightsConfig;
use crate::indicators::{IndicatorSnapshot, Signal};

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("signal weights must sum to 1.0 (rsi {rsi} + wavetrend {wavetrend} + aux {aux} = {sum})")]
    InvalidSignalWeight {
        rsi: f64,
        wavetrend: f64,
        aux: f64,
        sum: f64,
    },
}

/// Validated vote weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalWeights {
    rsi: f64,
    wavetrend: f64,
    aux: f64,
}

impl SignalWeights {
    pub fn new(rsi: f64, wavetrend: f64, aux: f64) -> Result<Self, SignalError> {
        let sum = rsi + wavetrend + aux;
        let valid = [rsi, wavetrend, aux].iter().all(|w| w.is_finite() && *w >= 0.0)
            && (sum - 1.0).abs() <= WEIGHT_TOLERANCE;

        if !valid {
            return Err(SignalError::InvalidSignalWeight {
                rsi,
                wavetrend,
                aux,
                sum,
            });
        }
        Ok(Self { rsi, wavetrend, aux })
    }

    pub fn from_config(config: &SignalWeightsConfig) -> Result<Self, SignalError> {
        Self::new(config.rsi, config.wavetrend, config.aux)
    }

    pub fn rsi(&self) -> f64 {
        self.rsi
    }

    pub fn wavetrend(&self) -> f64 {
        self.wavetrend
    }

    pub fn aux(&self) -> f64 {
        self.aux
    }
}

/// One indicator's share of the composite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub name: &'static str,
    pub score: f64,
    pub weight: f64,
    pub weighted: f64,
}

/// Combined decision score for one bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeSignal {
    pub timestamp: DateTime<Utc>,
    /// Weighted score clamped to [-1, 1]
    pub score: f64,
    pub contributions: Vec<Contribution>,
}

impl CompositeSignal {
    pub fn strength(&self) -> SignalStrength {
        SignalStrength::from_score(self.score)
    }
}

/// Descriptive bucket of a composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    VeryStrongBuy,
    StrongBuy,
    WeakBuy,
    Neutral,
    WeakSell,
    StrongSell,
    VeryStrongSell,
}

impl SignalStrength {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            SignalStrength::VeryStrongBuy
        } else if score >= 0.3 {
            SignalStrength::StrongBuy
        } else if score >= 0.1 {
            SignalStrength::WeakBuy
        } else if score <= -0.7 {
            SignalStrength::VeryStrongSell
        } else if score <= -0.3 {
            SignalStrength::StrongSell
        } else if score <= -0.1 {
            SignalStrength::WeakSell
        } else {
            SignalStrength::Neutral
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalStrength::VeryStrongBuy => "very strong buy",
            SignalStrength::StrongBuy => "strong buy",
            SignalStrength::WeakBuy => "weak buy",
            SignalStrength::Neutral => "neutral",
            SignalStrength::WeakSell => "weak sell",
            SignalStrength::StrongSell => "strong sell",
            SignalStrength::VeryStrongSell => "very strong sell",
        };
        write!(f, "{}", label)
    }
}

/// Side-effect-free weighted vote.
#[derive(Debug, Clone)]
pub struct SignalCombiner {
    weights: SignalWeights,
}

impl SignalCombiner {
    pub fn new(weights: SignalWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SignalWeights {
        &self.weights
    }

    pub fn combine(&self, snapshot: &IndicatorSnapshot) -> CompositeSignal {
        self.combine_signals(
            snapshot.timestamp,
            &snapshot.rsi,
            &snapshot.wavetrend,
            &snapshot.aux,
        )
    }

    pub fn combine_signals(
        &self,
        timestamp: DateTime<Utc>,
        rsi: &Signal,
        wavetrend: &Signal,
        aux: &Signal,
    ) -> CompositeSignal {
        let contributions: Vec<Contribution> = [
            (rsi, self.weights.rsi),
            (wavetrend, self.weights.wavetrend),
            (aux, self.weights.aux),
        ]
        .into_iter()
        .map(|(signal, weight)| Contribution {
            name: signal.name,
            score: signal.score,
            weight,
            weighted: signal.score * weight,
        })
        .collect();

        let score = contributions
            .iter()
            .map(|c| c.weighted)
            .sum::<f64>()
            .clamp(-1.0, 1.0);

        CompositeSignal {
            timestamp,
            score,
            contributions,
        }
    }
}
