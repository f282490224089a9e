//! WaveTrend oscillator over the typical price.

use super::ema::ema_series;
use super::IndicatorError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaveTrendReading {
    pub wt1: f64,
    pub wt2: f64,
}

/// WaveTrend of the last bar. Needs `channel + average` bars of hlc3.
pub fn wavetrend(
    hlc3: &[f64],
    channel: usize,
    average: usize,
    signal: usize,
) -> Result<WaveTrendReading, IndicatorError> {
    let required = channel + average;
    if hlc3.len() < required {
        return Err(IndicatorError::InsufficientData {
            indicator: "wavetrend",
            required,
            available: hlc3.len(),
        });
    }

    let esa = ema_series(hlc3, channel);
    let abs_dev: Vec<f64> = hlc3.iter().zip(&esa).map(|(p, e)| (p - e).abs()).collect();
    let de = ema_series(&abs_dev, channel);

    let ci: Vec<f64> = hlc3
        .iter()
        .zip(esa.iter().zip(&de))
        .map(|(p, (e, d))| if *d == 0.0 { 0.0 } else { (p - e) / (0.015 * d) })
        .collect();

    let wt1 = ema_series(&ci, average);
    let wt2 = ema_series(&wt1, signal);

    Ok(WaveTrendReading {
        wt1: wt1.last().copied().unwrap_or(0.0),
        wt2: wt2.last().copied().unwrap_or(0.0),
    })
}

/// Score a reading: crossovers in extreme territory are full strength,
/// ordinary crossovers half strength.
pub fn normalize_wavetrend(reading: WaveTrendReading, extreme: f64) -> f64 {
    let WaveTrendReading { wt1, wt2 } = reading;
    if wt1 > wt2 && wt1 < -extreme {
        1.0
    } else if wt1 < wt2 && wt1 > extreme {
        -1.0
    } else if wt1 > wt2 {
        0.5
    } else if wt1 < wt2 {
        -0.5
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_series_reads_zero() {
        let reading = wavetrend(&[100.0; 40], 10, 21, 4).unwrap();
        assert_eq!(reading.wt1, 0.0);
        assert_eq!(reading.wt2, 0.0);
        assert_eq!(normalize_wavetrend(reading, 50.0), 0.0);
    }

    #[test]
    fn test_insufficient_data() {
        assert!(matches!(
            wavetrend(&[100.0; 30], 10, 21, 4),
            Err(IndicatorError::InsufficientData { required: 31, .. })
        ));
    }

    #[test]
    fn test_rising_then_turning() {
        let mut prices = vec![100.0; 40];
        prices.extend((1..=5).map(|i| 100.0 + i as f64));
        let rising = wavetrend(&prices, 10, 21, 4).unwrap();
        assert!(rising.wt1 > rising.wt2);

        prices.extend((1..=3).map(|i| 105.0 - 2.0 * i as f64));
        let turning = wavetrend(&prices, 10, 21, 4).unwrap();
        assert!(turning.wt1 < turning.wt2);
    }

    #[test]
    fn test_normalization_levels() {
        let r = |wt1, wt2| WaveTrendReading { wt1, wt2 };
        assert_eq!(normalize_wavetrend(r(-60.0, -70.0), 50.0), 1.0);
        assert_eq!(normalize_wavetrend(r(60.0, 70.0), 50.0), -1.0);
        assert_eq!(normalize_wavetrend(r(10.0, 5.0), 50.0), 0.5);
        assert_eq!(normalize_wavetrend(r(5.0, 10.0), 50.0), -0.5);
    }
}
