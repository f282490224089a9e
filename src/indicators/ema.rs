//! Moving averages and dispersion helpers.

/// Exponentially weighted mean with smoothing `alpha`, seeded with the first value.
pub fn ewm(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// EMA series with span `period` (alpha = 2 / (period + 1)).
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    ewm(values, span_alpha(period))
}

fn span_alpha(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

/// Arithmetic mean; zero for an empty slice.
pub fn sma(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1); zero below two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = sma(values);
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Incremental EMA, identical to the last element of [`ema_series`] over the same inputs.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: span_alpha(period),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(p) => self.alpha * x + (1.0 - self.alpha) * p,
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seeded_with_first_value() {
        let out = ema_series(&[10.0, 20.0], 3);
        assert_eq!(out[0], 10.0);
        assert!((out[1] - 15.0).abs() < 1e-12); // alpha 0.5
    }

    #[test]
    fn test_incremental_matches_series() {
        let values: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let series = ema_series(&values, 20);
        let mut ema = Ema::new(20);
        for v in &values {
            ema.update(*v);
        }
        assert_eq!(ema.value(), series.last().copied());
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[1.0]), 0.0);
        let s = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s - 2.138089935).abs() < 1e-6);
    }
}
