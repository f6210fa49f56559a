use bigdecimal::BigDecimal;
use bigdecimal::ToPrimitive;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be greater than zero (got {0})")]
    NotPositive(String),
    #[error("amount {0} is below one whole unit")]
    BelowWholeUnit(String),
    #[error("amount {0} does not fit in a 64-bit integer")]
    OutOfRange(String),
}

const MAX_I64_DIGITS: i64 = 19;
const MAX_PLAIN_SCALE: i64 = 64;

/// Plain decimal text, or mantissa and exponent once the plain form would be huge.
fn describe(value: &BigDecimal) -> String {
    let (mantissa, scale) = value.as_bigint_and_exponent();
    if scale.unsigned_abs() > MAX_PLAIN_SCALE as u64 {
        format!("{mantissa}e{}", scale.saturating_neg())
    } else {
        value.to_string()
    }
}

/// Normalize a monetary value to 2 decimal places. Extra digits are truncated toward zero.
pub fn normalize_scale(value: &BigDecimal) -> BigDecimal {
    value.with_scale(2)
}

pub fn ensure_positive(value: &BigDecimal) -> Result<(), MoneyError> {
    if *value <= BigDecimal::from(0) {
        return Err(MoneyError::NotPositive(describe(value)));
    }
    Ok(())
}

/// Whole currency units as sent to mobile money gateways, which only accept integers.
/// Fractions are dropped, so `99.99` becomes `99`.
pub fn whole_units(value: &BigDecimal) -> Result<i64, MoneyError> {
    ensure_positive(value)?;
    // Decide from digit counts first; rescaling a value like `1e999999999` would
    // materialise the full power of ten.
    let (mantissa, scale) = value.as_bigint_and_exponent();
    let digits = mantissa.to_string().trim_start_matches('-').len() as i64;
    let integer_digits = digits.saturating_sub(scale);
    if integer_digits > MAX_I64_DIGITS {
        return Err(MoneyError::OutOfRange(describe(value)));
    }
    if integer_digits < 1 {
        return Err(MoneyError::BelowWholeUnit(describe(value)));
    }
    let units = value
        .with_scale(0)
        .to_i64()
        .ok_or_else(|| MoneyError::OutOfRange(describe(value)))?;
    if units < 1 {
        return Err(MoneyError::BelowWholeUnit(describe(value)));
    }
    Ok(units)
}

/// Subtract `amount` from `balance` without going below zero.
pub fn saturating_deduct(balance: &BigDecimal, amount: &BigDecimal) -> BigDecimal {
    let zero = BigDecimal::from(0);
    let left = balance - amount;
    if left < zero { zero } else { left }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn bd(s: &str) -> BigDecimal { BigDecimal::from_str(s).unwrap() }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_scale(&bd("12.3456")).to_string(), "12.34");
    }

    #[test]
    fn whole_units_truncates_fraction() {
        assert_eq!(whole_units(&bd("1500.99")), Ok(1500));
        assert_eq!(whole_units(&bd("1")), Ok(1));
    }

    #[test]
    fn whole_units_rejects_zero_and_negative() {
        assert!(matches!(whole_units(&bd("0")), Err(MoneyError::NotPositive(_))));
        assert!(matches!(whole_units(&bd("-10")), Err(MoneyError::NotPositive(_))));
    }

    #[test]
    fn whole_units_rejects_sub_unit_amounts() {
        assert!(matches!(whole_units(&bd("0.50")), Err(MoneyError::BelowWholeUnit(_))));
    }

    #[test]
    fn whole_units_bounds_huge_exponents() {
        assert_eq!(whole_units(&bd("1e999999999")), Err(MoneyError::OutOfRange("1e999999999".into())));
        assert!(matches!(whole_units(&bd("1e-999999999")), Err(MoneyError::BelowWholeUnit(_))));
        assert!(matches!(whole_units(&bd("9223372036854775808")), Err(MoneyError::OutOfRange(_))));
        assert_eq!(whole_units(&bd("9223372036854775807")), Ok(i64::MAX));
        assert_eq!(whole_units(&bd("15e2")), Ok(1500));
    }

    #[test]
    fn saturating_deduct_floors_at_zero() {
        assert_eq!(saturating_deduct(&bd("100"), &bd("40")), bd("60"));
        assert_eq!(saturating_deduct(&bd("10"), &bd("40")), BigDecimal::from(0));
    }
}
