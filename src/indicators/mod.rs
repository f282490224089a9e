//! Technical indicators and their normalised signals.
//!
//! Every indicator is a pure function of the candle window it is given.
//! A window shorter than an indicator's lookback yields
//! [`IndicatorError::InsufficientData`], which callers treat as "no signal yet".

pub mod bollinger;
pub mod ema;
pub mod momentum;
pub mod rsi;
pub mod wavetrend;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::IndicatorConfig;
use crate::exchange::Candle;
use crate::utils::to_f64;

pub use bollinger::{bollinger, BollingerBands};
pub use ema::{ema_series, sample_std, sma, Ema};
pub use momentum::momentum_signal;
pub use rsi::{normalize_rsi, rsi};
pub use wavetrend::{normalize_wavetrend, wavetrend, WaveTrendReading};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    #[error("{indicator} needs {required} bars, have {available}")]
    InsufficientData {
        indicator: &'static str,
        required: usize,
        available: usize,
    },
}

/// One indicator reading at a bar close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: &'static str,
    /// Indicator value before normalisation
    pub raw: f64,
    /// Normalised score in [-1, 1]
    pub score: f64,
}

impl Signal {
    pub fn new(name: &'static str, raw: f64, score: f64) -> Self {
        Self {
            name,
            raw,
            score: score.clamp(-1.0, 1.0),
        }
    }
}

/// All indicator readings for the last candle of a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub rsi: Signal,
    pub wavetrend: Signal,
    pub aux: Signal,
    pub wt: WaveTrendReading,
}

/// Computes the three voting signals from a candle window.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Bars needed before every indicator produces a value.
    pub fn required_bars(&self) -> usize {
        let c = &self.config;
        (c.rsi_period + 1)
            .max(c.wt_channel_length + c.wt_average_length)
            .max(c.momentum_short.max(c.momentum_long))
    }

    /// Compute all signals for the last candle of `candles`.
    pub fn compute(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, IndicatorError> {
        let c = &self.config;
        let last = candles.last().ok_or(IndicatorError::InsufficientData {
            indicator: "window",
            required: self.required_bars(),
            available: 0,
        })?;

        let closes: Vec<f64> = candles.iter().map(|k| to_f64(k.close)).collect();
        let hlc3: Vec<f64> = candles.iter().map(|k| to_f64(k.hlc3())).collect();

        let rsi_value = rsi(&closes, c.rsi_period)?;
        let wt = wavetrend(
            &hlc3,
            c.wt_channel_length,
            c.wt_average_length,
            c.wt_signal_length,
        )?;
        let (mom_raw, mom_score) = momentum_signal(&closes, c.momentum_short, c.momentum_long)?;

        Ok(IndicatorSnapshot {
            timestamp: last.timestamp,
            close: to_f64(last.close),
            rsi: Signal::new(
                "rsi",
                rsi_value,
                normalize_rsi(rsi_value, c.rsi_oversold, c.rsi_overbought),
            ),
            wavetrend: Signal::new(
                "wavetrend",
                wt.wt1 - wt.wt2,
                normalize_wavetrend(wt, c.wt_extreme_level),
            ),
            aux: Signal::new("aux", mom_raw, mom_score),
            wt,
        })
    }
}
