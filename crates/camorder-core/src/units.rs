//! Unit handling for parameter expressions
//!
//! Host parameters are stored as expressions such as `"2000 mm"` or
//! `"45 deg"`. Bare numbers coming from an order inherit the unit of the
//! parameter they replace, so this module splits expressions into their
//! numeric part and unit token and composes new ones.

use serde_json::Number;

/// A simple `<number> <unit>` expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleExpression<'a> {
    /// The numeric literal, as written
    pub number: &'a str,
    /// The trailing unit token, if any
    pub unit: Option<&'a str>,
}

/// Split an expression into numeric literal and unit token
///
/// Returns `None` for anything that is not a plain literal, e.g. formulas
/// referencing other parameters (`"width * 2"`).
pub fn split_expression(expression: &str) -> Option<SimpleExpression<'_>> {
    let trimmed = expression.trim();
    let number_len = numeric_prefix_len(trimmed);
    if number_len == 0 {
        return None;
    }

    let (number, rest) = trimmed.split_at(number_len);
    let rest = rest.trim();
    if rest.is_empty() {
        return Some(SimpleExpression { number, unit: None });
    }

    if is_unit_token(rest) {
        Some(SimpleExpression {
            number,
            unit: Some(rest),
        })
    } else {
        None
    }
}

/// Extract the unit token of an expression, if it has one
pub fn unit_of_expression(expression: &str) -> Option<&str> {
    split_expression(expression).and_then(|e| e.unit)
}

/// Compose `<number> <unit>`, or just the number when the unit is empty
pub fn with_unit(number: &str, unit: &str) -> String {
    let unit = unit.trim();
    if unit.is_empty() {
        number.to_string()
    } else {
        format!("{} {}", number, unit)
    }
}

/// Format a JSON number without introducing a spurious fraction
///
/// Integers stay integers (`2100`, not `2100.0`); floats keep their
/// shortest round-trip form.
pub fn format_number(value: &Number) -> String {
    if let Some(i) = value.as_i64() {
        i.to_string()
    } else if let Some(u) = value.as_u64() {
        u.to_string()
    } else {
        value.to_string()
    }
}

fn numeric_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;

    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }

    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - digits_start;

    if i < bytes.len() && bytes[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        digits += j - frac_start;
        i = j;
    }

    if digits == 0 {
        return 0;
    }

    // Exponent only counts when followed by digits, so "2e" stays a unit.
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }

    i
}

fn is_unit_token(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '/' | '^' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_with_unit() {
        let e = split_expression("2000 mm").unwrap();
        assert_eq!(e.number, "2000");
        assert_eq!(e.unit, Some("mm"));

        let e = split_expression("2.5in").unwrap();
        assert_eq!(e.number, "2.5");
        assert_eq!(e.unit, Some("in"));

        let e = split_expression("  -45 deg ").unwrap();
        assert_eq!(e.number, "-45");
        assert_eq!(e.unit, Some("deg"));
    }

    #[test]
    fn test_split_unitless() {
        let e = split_expression("3").unwrap();
        assert_eq!(e.number, "3");
        assert_eq!(e.unit, None);

        let e = split_expression("1.5e3").unwrap();
        assert_eq!(e.number, "1.5e3");
        assert_eq!(e.unit, None);
    }

    #[test]
    fn test_formulas_are_not_simple() {
        assert!(split_expression("width * 2").is_none());
        assert!(split_expression("10 mm + 2 mm").is_none());
        assert!(split_expression("").is_none());
        assert!(split_expression("mm").is_none());
    }

    #[test]
    fn test_compound_units() {
        assert_eq!(unit_of_expression("1200 mm/min"), Some("mm/min"));
        assert_eq!(unit_of_expression("4 mm^2"), Some("mm^2"));
    }

    #[test]
    fn test_with_unit() {
        assert_eq!(with_unit("2100", "mm"), "2100 mm");
        assert_eq!(with_unit("3", ""), "3");
        assert_eq!(with_unit("3", "  "), "3");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(&Number::from(2100)), "2100");
        assert_eq!(format_number(&Number::from(-4)), "-4");
        assert_eq!(format_number(&Number::from_f64(2.5).unwrap()), "2.5");
    }
}
