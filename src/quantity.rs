//! Exact arithmetic over Kubernetes resource quantities
//!
//! Quota dimensions are declared as `Quantity` strings ("3k", "5Gi", "4M").
//! Summing and comparing them requires converting to a common integer base
//! unit. Fractional results are rounded up, matching how the API server
//! reports the integer value of a quantity.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::{Error, Result};

enum Scale {
    Decimal(i32),
    Binary(u32),
}

/// Parse a quantity into integer base units
pub fn parse(quantity: &Quantity) -> Result<i128> {
    parse_str(&quantity.0)
}

/// Parse a quantity string into integer base units
pub fn parse_str(raw: &str) -> Result<i128> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::quantity("empty quantity"));
    }

    let (negative, unsigned) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let split = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(split);

    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
        return Err(Error::quantity(format!("'{raw}' has no numeric part")));
    }

    let scale = match suffix {
        "" => Scale::Decimal(0),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(1),
        "Mi" => Scale::Binary(2),
        "Gi" => Scale::Binary(3),
        "Ti" => Scale::Binary(4),
        "Pi" => Scale::Binary(5),
        "Ei" => Scale::Binary(6),
        other => match other.strip_prefix(['e', 'E']) {
            Some(exp) => Scale::Decimal(
                exp.parse::<i32>()
                    .map_err(|_| Error::quantity(format!("'{raw}' has an invalid exponent")))?,
            ),
            None => return Err(Error::quantity(format!("'{raw}' has unknown suffix"))),
        },
    };

    let overflow = || Error::quantity(format!("'{raw}' is out of range"));

    let digits = format!("{int_part}{frac_part}");
    let mantissa: i128 = digits.parse().map_err(|_| overflow())?;
    let frac_len = i32::try_from(frac_part.len()).map_err(|_| overflow())?;

    let value = match scale {
        Scale::Decimal(exp) => shift_decimal(mantissa, exp - frac_len).ok_or_else(overflow)?,
        Scale::Binary(power) => {
            let scaled = 1024i128
                .checked_pow(power)
                .and_then(|m| mantissa.checked_mul(m))
                .ok_or_else(overflow)?;
            shift_decimal(scaled, -frac_len).ok_or_else(overflow)?
        }
    };

    Ok(if negative { -value } else { value })
}

/// Multiply by 10^exp, rounding up when exp is negative
fn shift_decimal(value: i128, exp: i32) -> Option<i128> {
    let factor = 10i128.checked_pow(exp.unsigned_abs())?;
    if exp >= 0 {
        value.checked_mul(factor)
    } else {
        let quotient = value / factor;
        if value % factor == 0 {
            Some(quotient)
        } else {
            Some(quotient + 1)
        }
    }
}

/// Render integer base units as a canonical quantity
pub fn to_quantity(value: i128) -> Quantity {
    Quantity(value.to_string())
}

/// Compare two quantities by value rather than by spelling
///
/// Falls back to textual equality when either side does not parse.
pub fn semantically_equal(a: &Quantity, b: &Quantity) -> bool {
    match (parse(a), parse(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a.0 == b.0,
    }
}
