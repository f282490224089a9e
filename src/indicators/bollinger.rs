//! Bollinger bands.

use super::ema::{sample_std, sma};
use super::IndicatorError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bands over the last `period` closes: SMA ± mult × sample stddev.
pub fn bollinger(closes: &[f64], period: usize, mult: f64) -> Result<BollingerBands, IndicatorError> {
    if period == 0 || closes.len() < period {
        return Err(IndicatorError::InsufficientData {
            indicator: "bollinger",
            required: period,
            available: closes.len(),
        });
    }

    let window = &closes[closes.len() - period..];
    let middle = sma(window);
    let width = mult * sample_std(window);

    Ok(BollingerBands {
        upper: middle + width,
        middle,
        lower: middle - width,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands_are_symmetric() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let bands = bollinger(&closes, 5, 2.0).unwrap();
        assert_eq!(bands.middle, 3.0);
        assert!((bands.upper - bands.middle - (bands.middle - bands.lower)).abs() < 1e-12);
        assert!((bands.upper - (3.0 + 2.0 * 2.5f64.sqrt())).abs() < 1e-12);
    }

    #[test]
    fn test_uses_trailing_window() {
        let closes = [100.0, 100.0, 1.0, 1.0, 1.0];
        let bands = bollinger(&closes, 3, 2.0).unwrap();
        assert_eq!(bands.middle, 1.0);
        assert_eq!(bands.upper, 1.0);
        assert!(bollinger(&closes, 6, 2.0).is_err());
    }
}
