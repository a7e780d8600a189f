//! Request payload checks run before anything reaches the service.

use crate::error::ValidationError;
use crate::utils::digit_count;

pub const MAX_RECIPIENTS: usize = 100;
pub const MAX_MESSAGE_CHARS: usize = 4096;

const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError(message.into())
}

pub fn phone_number(raw: &str) -> Result<(), ValidationError> {
    let digits = digit_count(raw);
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits) {
        return Err(invalid(format!(
            "Phone number must be between {} and {} digits",
            MIN_PHONE_DIGITS, MAX_PHONE_DIGITS
        )));
    }
    Ok(())
}

/// Checks the list size, then every entry. All bad entries are reported
/// together, numbered from 1.
pub fn phone_numbers(numbers: &[String]) -> Result<(), ValidationError> {
    if numbers.is_empty() {
        return Err(invalid("Phone numbers array cannot be empty"));
    }
    if numbers.len() > MAX_RECIPIENTS {
        return Err(invalid(format!(
            "Too many phone numbers (max {})",
            MAX_RECIPIENTS
        )));
    }

    let errors: Vec<String> = numbers
        .iter()
        .enumerate()
        .filter_map(|(i, n)| {
            phone_number(n)
                .err()
                .map(|e| format!("Phone number {}: {}", i + 1, e))
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(invalid(errors.join("; ")))
    }
}

pub fn message(body: &str) -> Result<(), ValidationError> {
    if body.trim().is_empty() {
        return Err(invalid("Message cannot be empty"));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(invalid(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("9876543210", true)]
    #[case("+91 98765 43210", true)]
    #[case("1234567", true)]
    #[case("123456", false)]
    #[case("1234567890123456", false)]
    #[case("call me", false)]
    fn test_phone_number(#[case] raw: &str, #[case] ok: bool) {
        assert_eq!(phone_number(raw).is_ok(), ok);
    }

    #[test]
    fn test_phone_numbers_reports_every_bad_entry() {
        let numbers = vec!["9876543210".to_string(), "12".to_string(), "abc".to_string()];
        let err = phone_numbers(&numbers).unwrap_err();
        assert!(err.0.starts_with("Phone number 2: "));
        assert!(err.0.contains("; Phone number 3: "));
    }

    #[test]
    fn test_phone_numbers_bounds() {
        assert_eq!(
            phone_numbers(&[]).unwrap_err().0,
            "Phone numbers array cannot be empty"
        );
        let many = vec!["9876543210".to_string(); MAX_RECIPIENTS + 1];
        assert_eq!(
            phone_numbers(&many).unwrap_err().0,
            "Too many phone numbers (max 100)"
        );
        assert!(phone_numbers(&many[..MAX_RECIPIENTS]).is_ok());
    }

    #[test]
    fn test_message() {
        assert!(message("Hello").is_ok());
        assert!(message("   \n").is_err());
        assert!(message(&"a".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert!(message(&"a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
        // Counted in characters, not bytes.
        assert!(message(&"é".repeat(MAX_MESSAGE_CHARS)).is_ok());
    }
}
