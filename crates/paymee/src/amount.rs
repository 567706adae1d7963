//! Conversion between human decimal strings and smallest-unit integers.

use num_bigint::BigUint;

use crate::abi::U256;
use crate::error::Error;

/// Parse a decimal string like `"0.01"` into smallest units for `decimals`.
///
/// Rejects signs, exponents, separators and fractions finer than `decimals`
/// allows (trailing zeros beyond the precision are fine).
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256, Error> {
    let s = amount.trim();
    if s.is_empty() {
        return Err(Error::InvalidAmountFormat("amount is empty".to_string()));
    }
    if s.starts_with('-') {
        return Err(Error::InvalidAmountFormat(format!(
            "amount must not be negative: {s}"
        )));
    }

    let (integer_part, fraction_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };

    if integer_part.is_empty() && fraction_part.is_empty() {
        return Err(Error::InvalidAmountFormat(format!("not a number: {s}")));
    }
    if !integer_part.chars().all(|c| c.is_ascii_digit())
        || !fraction_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(Error::InvalidAmountFormat(format!("not a number: {s}")));
    }

    let fraction_part = fraction_part.trim_end_matches('0');
    let decimals = decimals as usize;
    if fraction_part.len() > decimals {
        return Err(Error::InvalidAmountFormat(format!(
            "{s} has more than {decimals} decimal places"
        )));
    }

    let mut digits = String::with_capacity(integer_part.len() + decimals);
    digits.push_str(integer_part);
    digits.push_str(fraction_part);
    digits.push_str(&"0".repeat(decimals - fraction_part.len()));

    let value = BigUint::parse_bytes(digits.as_bytes(), 10).unwrap_or_default();
    if value.bits() > 256 {
        return Err(Error::InvalidAmountFormat(format!(
            "{s} does not fit in 256 bits"
        )));
    }
    Ok(value)
}

/// Format smallest units as a decimal string, trimming trailing zeros.
pub fn format_units(amount: &U256, decimals: u8) -> String {
    let s = amount.to_string();
    let decimals = decimals as usize;

    if decimals == 0 {
        return s;
    }

    if s.len() <= decimals {
        let zeros = decimals - s.len();
        let mut result = String::from("0.");
        result.push_str(&"0".repeat(zeros));
        result.push_str(&s);
        let trimmed = result.trim_end_matches('0');
        if trimmed.ends_with('.') {
            return format!("{trimmed}0");
        }
        return trimmed.to_string();
    }

    let (integer_part, decimal_part) = s.split_at(s.len() - decimals);
    let trimmed = decimal_part.trim_end_matches('0');
    if trimmed.is_empty() {
        integer_part.to_string()
    } else {
        format!("{integer_part}.{trimmed}")
    }
}

/// Render an integer with `_` thousands separators, for logs.
pub fn group_digits(amount: &U256) -> String {
    let s = amount.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push('_');
        }
        out.push(c);
    }
    out
}
