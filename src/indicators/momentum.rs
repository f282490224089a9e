//! Auxiliary buy/sell signal from price momentum against two SMAs.

use super::ema::sma;
use super::IndicatorError;

/// Returns `(raw, score)` where raw is the mean relative distance of the last
/// close from the short and long SMAs and score is `clip(raw * 10, -1, 1)`.
pub fn momentum_signal(
    closes: &[f64],
    short: usize,
    long: usize,
) -> Result<(f64, f64), IndicatorError> {
    let required = short.max(long);
    if required == 0 || closes.len() < required {
        return Err(IndicatorError::InsufficientData {
            indicator: "momentum",
            required,
            available: closes.len(),
        });
    }

    let price = closes[closes.len() - 1];
    let sma_short = sma(&closes[closes.len() - short..]);
    let sma_long = sma(&closes[closes.len() - long..]);

    let vs_short = if sma_short != 0.0 { (price - sma_short) / sma_short } else { 0.0 };
    let vs_long = if sma_long != 0.0 { (price - sma_long) / sma_long } else { 0.0 };

    let raw = (vs_short + vs_long) / 2.0;
    Ok((raw, (raw * 10.0).clamp(-1.0, 1.0)))
}
