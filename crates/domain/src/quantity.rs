use runguard_core::{AppError, AppResult};

const KILO: u64 = 1_000;
const MEGA: u64 = 1_000_000;
const GIGA: u64 = 1_000_000_000;

/// Parses a magnitude string such as `500K` or `10M` into an integer.
///
/// The suffix is matched exactly against the upper-case letters `K`, `M` and
/// `G`; callers normalize case before storing configuration text. Any other
/// character, an empty numeric part or an overflowing value fails with a
/// configuration error naming `field_name`.
pub fn parse_quantity(field_name: &str, text: &str) -> AppResult<u64> {
    let (digits, multiplier) = match text.as_bytes().last() {
        Some(b'K') => (&text[..text.len() - 1], KILO),
        Some(b'M') => (&text[..text.len() - 1], MEGA),
        Some(b'G') => (&text[..text.len() - 1], GIGA),
        _ => (text, 1),
    };

    if digits.is_empty() {
        return Err(AppError::Configuration(format!(
            "{field_name} must start with at least one digit, got '{text}'"
        )));
    }

    if !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(AppError::Configuration(format!(
            "{field_name} must be digits with an optional K, M or G suffix, got '{text}'"
        )));
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(|| {
            AppError::Configuration(format!("{field_name} is too large, got '{text}'"))
        })
}

/// A magnitude limit holding both its normalized text and parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantity {
    text: String,
    value: u64,
}

impl Quantity {
    /// Normalizes `text` to upper case and parses it.
    ///
    /// Returns `Ok(None)` for blank text, which means "not limited". Surrounding
    /// whitespace on a non-blank value is rejected like any other stray byte.
    pub fn parse_optional(field_name: &str, text: Option<&str>) -> AppResult<Option<Self>> {
        let Some(text) = text.filter(|text| !text.trim().is_empty()) else {
            return Ok(None);
        };

        let text = text.to_ascii_uppercase();
        let value = parse_quantity(field_name, text.as_str())?;

        Ok(Some(Self { text, value }))
    }

    /// Returns the normalized configuration text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    /// Returns the parsed integer value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use runguard_core::AppError;

    use super::{Quantity, parse_quantity};

    #[test]
    fn suffixes_scale_by_powers_of_thousand() {
        assert_eq!(parse_quantity("byteLimit", "7").ok(), Some(7));
        assert_eq!(parse_quantity("byteLimit", "500K").ok(), Some(500_000));
        assert_eq!(parse_quantity("byteLimit", "10M").ok(), Some(10_000_000));
        assert_eq!(parse_quantity("byteLimit", "2G").ok(), Some(2_000_000_000));
    }

    #[test]
    fn garbage_is_a_configuration_error() {
        for text in ["12x", "", "-5", "M", "+5", "1.5M", " 5", "10m", "5KK"] {
            let result = parse_quantity("runLimit", text);
            assert!(
                matches!(result, Err(AppError::Configuration(ref message)) if message.contains("runLimit")),
                "expected configuration error for '{text}', got {result:?}"
            );
        }
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(parse_quantity("byteLimit", "18446744073709551615").is_ok());
        assert!(parse_quantity("byteLimit", "18446744073709551616").is_err());
        assert!(parse_quantity("byteLimit", "18446744073709551G").is_err());
    }

    #[test]
    fn optional_quantity_normalizes_case_and_treats_blank_as_unset() {
        let quantity = Quantity::parse_optional("byteLimit", Some("10m"));
        assert!(matches!(
            quantity,
            Ok(Some(ref value)) if value.as_str() == "10M" && value.value() == 10_000_000
        ));

        assert!(matches!(
            Quantity::parse_optional("byteLimit", Some("  ")),
            Ok(None)
        ));
        assert!(matches!(Quantity::parse_optional("byteLimit", None), Ok(None)));
    }

    #[test]
    fn optional_quantity_rejects_padded_values() {
        for text in [" 10M ", "10M ", " 5"] {
            let result = Quantity::parse_optional("byteLimit", Some(text));
            assert!(
                matches!(result, Err(AppError::Configuration(ref message)) if message.contains("byteLimit")),
                "expected configuration error for '{text}', got {result:?}"
            );
        }
    }

    proptest! {
        #[test]
        fn formatted_quantities_parse_back(
            value in 0_u64..=1_000_000_000,
            suffix in prop::sample::select(vec![("", 1_u64), ("K", 1_000), ("M", 1_000_000), ("G", 1_000_000_000)]),
        ) {
            let (letter, multiplier) = suffix;
            let text = format!("{value}{letter}");
            prop_assert_eq!(parse_quantity("byteLimit", &text).ok(), Some(value * multiplier));
        }
    }
}
