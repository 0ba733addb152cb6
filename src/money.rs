//! Decimal helpers shared by coupon and pricing arithmetic.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use validator::ValidationError;

/// Largest amount accepted from a client or produced by a single line.
pub const MAX_AMOUNT: Decimal = dec!(1_000_000_000_000_000);

/// Round a monetary amount to two decimal places, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Render an amount for customer-facing messages ("1000", "12.5").
pub fn format_money(amount: Decimal) -> String {
    round_money(amount).normalize().to_string()
}

/// `amount * percent / 100`, rounded. Saturates instead of overflowing.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    round_money(amount.saturating_mul(percent / Decimal::ONE_HUNDRED))
}

/// Validator for client-supplied amounts: `0 <= value <= MAX_AMOUNT`.
pub fn validate_amount(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("must not be negative".into());
        return Err(err);
    }
    if *value > MAX_AMOUNT {
        let mut err = ValidationError::new("max_amount");
        err.message = Some(format!("must not exceed {}", MAX_AMOUNT).into());
        return Err(err);
    }
    Ok(())
}
