//! Phone number normalization.

/// Normalize raw input into the digits-only identifier the channel expects.
///
/// Non-digits are stripped first. Twelve digits are assumed to already carry
/// a country code; ten digits get `country_code` prepended; eleven digits
/// with a leading zero lose the zero and get `country_code`. Anything else is
/// returned as the cleaned digits and left for the channel to reject.
pub fn format_phone_number(raw: &str, country_code: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match cleaned.len() {
        12 => cleaned,
        10 => format!("{}{}", country_code, cleaned),
        11 if cleaned.starts_with('0') => format!("{}{}", country_code, &cleaned[1..]),
        _ => cleaned,
    }
}

/// Count of ASCII digits in `raw`, used by request validation.
pub fn digit_count(raw: &str) -> usize {
    raw.chars().filter(|c| c.is_ascii_digit()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::ten_digits("9876543210", "919876543210")]
    #[case::twelve_digits("919876543210", "919876543210")]
    #[case::leading_zero("09876543210", "919876543210")]
    #[case::punctuation("+91-987-654-3210", "919876543210")]
    #[case::spaces_and_parens("(987) 654 3210", "919876543210")]
    #[case::eleven_without_zero("19876543210", "19876543210")]
    #[case::too_short("12345", "12345")]
    #[case::too_long("0044987654321099", "0044987654321099")]
    #[case::empty("", "")]
    #[case::letters_only("call me", "")]
    fn test_format_phone_number(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(format_phone_number(raw, "91"), expected);
    }

    #[test]
    fn test_country_code_is_configurable() {
        assert_eq!(format_phone_number("2025550123", "1"), "12025550123");
        assert_eq!(format_phone_number("07911123456", "44"), "447911123456");
    }

    #[test]
    fn test_digit_count() {
        assert_eq!(digit_count("+1 (202) 555-0123"), 11);
        assert_eq!(digit_count("abc"), 0);
    }
}
