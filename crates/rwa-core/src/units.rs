//! Smallest-unit amount formatting.
//!
//! Ledger amounts are integers in the smallest unit of a token. Operators
//! type and read decimals; these helpers convert between the two.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{CoreError, Result};

/// Maximum decimals supported by `Decimal` scaling.
const MAX_DECIMALS: u32 = 18;

/// Format a smallest-unit amount as a decimal string with `decimals` places.
///
/// Trailing zeros are trimmed: `format_units(1_500_000, 6) == "1.5"`.
#[must_use]
pub fn format_units(amount: u64, decimals: u32) -> String {
    let decimals = decimals.min(MAX_DECIMALS);
    let value = Decimal::from_i128_with_scale(amount as i128, decimals);
    value.normalize().to_string()
}

/// Parse a decimal string into a smallest-unit amount.
///
/// Fails if the string has more fractional digits than `decimals`, is
/// negative, or does not fit in `u64`.
pub fn parse_units(s: &str, decimals: u32) -> Result<u64> {
    if decimals > MAX_DECIMALS {
        return Err(CoreError::InvalidAmount(format!(
            "decimals {decimals} exceeds {MAX_DECIMALS}"
        )));
    }
    let value: Decimal = s
        .trim()
        .parse()
        .map_err(|e| CoreError::InvalidAmount(format!("{s}: {e}")))?;
    if value.is_sign_negative() {
        return Err(CoreError::InvalidAmount(format!("{s}: negative")));
    }
    if value.normalize().scale() > decimals {
        return Err(CoreError::InvalidAmount(format!(
            "{s}: more than {decimals} decimal places"
        )));
    }
    let scaled = value
        .checked_mul(Decimal::from(10u64.pow(decimals)))
        .ok_or_else(|| CoreError::InvalidAmount(format!("{s}: overflow")))?;
    scaled
        .to_u64()
        .ok_or_else(|| CoreError::InvalidAmount(format!("{s}: out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(1_500_000, 6), "1.5");
        assert_eq!(format_units(1_000_000, 6), "1");
        assert_eq!(format_units(1, 6), "0.000001");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1.5", 6).unwrap(), 1_500_000);
        assert_eq!(parse_units("0.000001", 6).unwrap(), 1);
        assert_eq!(parse_units("42", 0).unwrap(), 42);
        assert_eq!(parse_units(" 2.50 ", 2).unwrap(), 250);
    }

    #[test]
    fn test_parse_units_rejects_bad_input() {
        assert!(parse_units("0.0000001", 6).is_err());
        assert!(parse_units("-1", 6).is_err());
        assert!(parse_units("abc", 6).is_err());
        assert!(parse_units("1", 19).is_err());
    }

    #[test]
    fn test_parse_matches_decimal_scaling() {
        use rust_decimal_macros::dec;

        let amount = parse_units("1234.5678", 6).unwrap();
        assert_eq!(Decimal::from(amount), dec!(1234.5678) * dec!(1000000));
        assert_eq!(format_units(amount, 6).parse::<Decimal>().unwrap(), dec!(1234.5678));
    }
}
