//! Relative Strength Index with Wilder smoothing.

use super::ema::ewm;
use super::IndicatorError;

/// RSI of the last close. Needs `period + 1` closes.
///
/// Gains and losses are smoothed with alpha = 1 / period. A window with no
/// movement at all reads 50.
pub fn rsi(closes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    let required = period + 1;
    if period == 0 || closes.len() < required {
        return Err(IndicatorError::InsufficientData {
            indicator: "rsi",
            required,
            available: closes.len(),
        });
    }

    let (ups, downs): (Vec<f64>, Vec<f64>) = closes
        .windows(2)
        .map(|w| {
            let delta = w[1] - w[0];
            (delta.max(0.0), (-delta).max(0.0))
        })
        .unzip();

    let alpha = 1.0 / period as f64;
    let avg_up = ewm(&ups, alpha).last().copied().unwrap_or(0.0);
    let avg_down = ewm(&downs, alpha).last().copied().unwrap_or(0.0);

    if avg_up == 0.0 && avg_down == 0.0 {
        return Ok(50.0);
    }
    if avg_down == 0.0 {
        return Ok(100.0);
    }
    Ok(100.0 - 100.0 / (1.0 + avg_up / avg_down))
}

/// Map RSI to [-1, 1]: oversold and below is +1, overbought and above is -1,
/// linear through 0 at 50.
pub fn normalize_rsi(value: f64, oversold: f64, overbought: f64) -> f64 {
    if value <= oversold {
        1.0
    } else if value >= overbought {
        -1.0
    } else if value < 50.0 {
        (50.0 - value) / (50.0 - oversold)
    } else {
        -(value - 50.0) / (overbought - 50.0)
    }
}
