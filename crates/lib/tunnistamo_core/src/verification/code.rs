//! Confirmation codes and tokens.
//!
//! A code is always a string of exactly six digits, zero padded. User input
//! goes through [`normalize_code`] before it is compared; codes are never
//! parsed as integers.

use rand::distr::Alphanumeric;
use rand::{Rng, rng};

pub const CODE_LENGTH: usize = 6;

/// Length of the durable confirmation token.
pub const TOKEN_LENGTH: usize = 20;

/// Uniformly random six-digit code.
pub fn generate_code() -> String {
    format!("{:06}", rng().random_range(0..1_000_000u32))
}

/// Random alphanumeric token carried by confirmation links.
pub fn generate_confirmation_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Strip every non-digit and left-pad to six digits.
///
/// Empty input and input with more than six digits yield `None`.
pub fn normalize_code(input: &str) -> Option<String> {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() || digits.len() > CODE_LENGTH {
        return None;
    }
    Some(format!("{digits:0>6}"))
}

/// Compare user input against a stored code.
pub fn codes_match(stored: &str, input: &str) -> bool {
    normalize_code(input).is_some_and(|candidate| constant_time_eq(stored, &candidate))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn tokens_are_alphanumeric() {
        let token = generate_confirmation_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_confirmation_token());
    }

    #[test]
    fn leading_zeros_are_restored() {
        assert_eq!(normalize_code("7890").as_deref(), Some("007890"));
        assert_eq!(normalize_code("7 890").as_deref(), Some("007890"));
        assert_eq!(normalize_code("007-890").as_deref(), Some("007890"));
        assert!(codes_match("007890", "7890"));
        assert!(codes_match("007890", "007890"));
    }

    #[test]
    fn overlong_or_empty_input_never_matches() {
        assert_eq!(normalize_code("0007890"), None);
        assert_eq!(normalize_code("abc"), None);
        assert!(!codes_match("007890", ""));
        assert!(!codes_match("007890", "1007890"));
        assert!(!codes_match("007890", "7891"));
    }
}
