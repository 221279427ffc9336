//! Exact decimal handling for `N` attribute values.
//!
//! Numbers travel as strings on the wire. They are parsed into
//! [`rust_decimal::Decimal`] for comparison and arithmetic so that `1.0` and
//! `1` compare equal and `0.1 + 0.2` is exactly `0.3`.

use std::cmp::Ordering;

use rust_decimal::Decimal;

/// Parse a DynamoDB number string.
///
/// Accepts plain decimal and scientific notation. Returns `None` for anything
/// that does not denote a finite number representable in 28 significant digits.
#[must_use]
pub fn parse_number(s: &str) -> Option<Decimal> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains(['e', 'E']) {
        Decimal::from_scientific(trimmed).ok()
    } else {
        Decimal::from_str_exact(trimmed).ok()
    }
}

/// Returns `true` if `s` is a well-formed number string.
#[must_use]
pub fn is_valid_number(s: &str) -> bool {
    parse_number(s).is_some()
}

/// Canonical string form of a number: trailing fractional zeros are dropped.
#[must_use]
pub fn format_number(d: Decimal) -> String {
    d.normalize().to_string()
}

/// Compare two number strings numerically. `None` if either fails to parse.
#[must_use]
pub fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_number(a)?.cmp(&parse_number(b)?))
}

/// Add two number strings. `None` on parse failure or overflow.
#[must_use]
pub fn add_numbers(a: &str, b: &str) -> Option<String> {
    parse_number(a)?
        .checked_add(parse_number(b)?)
        .map(format_number)
}

/// Subtract `b` from `a`. `None` on parse failure or overflow.
#[must_use]
pub fn sub_numbers(a: &str, b: &str) -> Option<String> {
    parse_number(a)?
        .checked_sub(parse_number(b)?)
        .map(format_number)
}
