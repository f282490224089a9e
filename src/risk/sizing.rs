//! Position sizing rules.

use rust_decimal::Decimal;

use crate::config::SizingRule;
use crate::utils::{round_down_to_lot, safe_div};

/// Inputs to a sizing decision.
#[derive(Debug, Clone, Copy)]
pub struct SizingInput {
    pub capital: Decimal,
    pub entry_price: Decimal,
    pub stop_loss_pct: Decimal,
    pub per_trade_risk_pct: Decimal,
    pub fixed_notional: Decimal,
    pub size_step: Decimal,
}

/// Quantity for a new position, rounded down to the size step.
///
/// Fixed fractional risks `per_trade_risk_pct` of capital on the distance to
/// the stop: `capital * risk / (entry * stop_pct)`.
pub fn position_size(rule: SizingRule, input: &SizingInput) -> Decimal {
    if input.entry_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = match rule {
        SizingRule::FixedFractional => safe_div(
            input.capital * input.per_trade_risk_pct,
            input.entry_price * input.stop_loss_pct,
        ),
        SizingRule::FixedNotional => input.fixed_notional / input.entry_price,
    };

    round_down_to_lot(raw.max(Decimal::ZERO), input.size_step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn input() -> SizingInput {
        SizingInput {
            capital: dec!(10000),
            entry_price: dec!(100),
            stop_loss_pct: dec!(0.02),
            per_trade_risk_pct: dec!(0.01),
            fixed_notional: dec!(1000),
            size_step: dec!(0.001),
        }
    }

    #[test]
    fn test_fixed_fractional() {
        // 100 at risk over a 2 USD stop distance
        assert_eq!(position_size(SizingRule::FixedFractional, &input()), dec!(50));
    }

    #[test]
    fn test_fixed_notional() {
        let i = SizingInput {
            entry_price: dec!(30),
            ..input()
        };
        assert_eq!(position_size(SizingRule::FixedNotional, &i), dec!(33.333));
    }

    #[test]
    fn test_bad_price_sizes_zero() {
        let i = SizingInput {
            entry_price: Decimal::ZERO,
            ..input()
        };
        assert_eq!(position_size(SizingRule::FixedNotional, &i), Decimal::ZERO);
    }
}
