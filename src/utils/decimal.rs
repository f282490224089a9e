//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Convert basis points to decimal rate
pub fn from_basis_points(bps: Decimal) -> Decimal {
    bps / dec!(10000)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Relative gap between two prices: |a - b| / min(a, b).
///
/// Zero when either price is non-positive.
pub fn relative_spread(a: Decimal, b: Decimal) -> Decimal {
    let low = a.min(b);
    if low <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (a - b).abs() / low
}

/// Lossy conversion for indicator math.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Convert a float metric back to a decimal, mapping NaN/inf to zero.
pub fn from_f64(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
    }

    #[test]
    fn test_basis_points() {
        assert_eq!(from_basis_points(dec!(50)), dec!(0.005)); // 50 bp = 0.5%
    }

    #[test]
    fn test_relative_spread() {
        assert_eq!(relative_spread(dec!(100), dec!(100.5)), dec!(0.005));
        assert_eq!(relative_spread(dec!(100.5), dec!(100)), dec!(0.005));
        assert_eq!(relative_spread(dec!(0), dec!(100)), Decimal::ZERO);
    }

    #[test]
    fn test_float_conversion() {
        assert_eq!(to_f64(dec!(1.5)), 1.5);
        assert_eq!(from_f64(f64::NAN), Decimal::ZERO);
        assert_eq!(from_f64(0.25), dec!(0.25));
        assert_eq!(safe_div(dec!(1), Decimal::ZERO), Decimal::ZERO);
    }
}
