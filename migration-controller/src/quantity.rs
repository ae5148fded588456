//! Exact arithmetic on Kubernetes resource quantities.
//!
//! `k8s_openapi`'s `Quantity` is an opaque string; the shrink check needs a
//! total order over values like `1Gi`, `500Mi` and `1000m`. Quantities are
//! canonicalized to nano-units in an `i128`, which is exact for every suffix
//! the platform accepts (`n` up to `Ei`).

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("malformed quantity {0:?}")]
    Malformed(String),
    #[error("quantity {0:?} out of range")]
    OutOfRange(String),
}

/// Value of the quantity in nano-units (10^-9 of the base unit).
pub fn canonical(q: &Quantity) -> Result<i128, QuantityError> {
    let s = q.0.trim();
    let malformed = || QuantityError::Malformed(q.0.clone());
    let out_of_range = || QuantityError::OutOfRange(q.0.clone());

    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    // Split the decimal mantissa from the suffix.
    let number_len = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(number_len);
    if number.is_empty() || number.chars().filter(|c| *c == '.').count() > 1 {
        return Err(malformed());
    }

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(malformed());
    }

    let digits: String = int_part.chars().chain(frac_part.chars()).collect();
    if digits.len() > 30 {
        return Err(out_of_range());
    }
    let mantissa: i128 = digits.parse().map_err(|_| malformed())?;

    // A suffix is either a fixed scale or a decimal exponent.
    let (pow10, binary): (i32, i128) = match suffix {
        "" => (0, 1),
        "n" => (-9, 1),
        "u" => (-6, 1),
        "m" => (-3, 1),
        "k" => (3, 1),
        "M" => (6, 1),
        "G" => (9, 1),
        "T" => (12, 1),
        "P" => (15, 1),
        "E" => (18, 1),
        "Ki" => (0, 1 << 10),
        "Mi" => (0, 1 << 20),
        "Gi" => (0, 1 << 30),
        "Ti" => (0, 1 << 40),
        "Pi" => (0, 1 << 50),
        "Ei" => (0, 1 << 60),
        _ => match suffix.strip_prefix(['e', 'E']) {
            Some(exp) => (exp.parse().map_err(|_| malformed())?, 1),
            None => return Err(malformed()),
        },
    };

    let exp10 = 9 + pow10 - frac_part.len() as i32;
    let mut value = mantissa.checked_mul(binary).ok_or_else(out_of_range)?;
    if exp10 >= 0 {
        let scale = 10i128.checked_pow(u32::try_from(exp10).map_err(|_| out_of_range())?);
        value = scale
            .and_then(|s| value.checked_mul(s))
            .ok_or_else(out_of_range)?;
    } else {
        let scale = 10i128
            .checked_pow(u32::try_from(-exp10).map_err(|_| out_of_range())?)
            .ok_or_else(out_of_range)?;
        value /= scale;
    }

    Ok(if negative { -value } else { value })
}

pub fn compare(a: &Quantity, b: &Quantity) -> Result<Ordering, QuantityError> {
    Ok(canonical(a)?.cmp(&canonical(b)?))
}
