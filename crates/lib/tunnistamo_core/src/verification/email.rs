//! Candidate email checks and placeholder addresses.

use regex::Regex;

use super::VerificationError;

/// Local-part prefix of generated placeholder addresses.
pub const PLACEHOLDER_PREFIX: &str = "tunnistamo-";

/// Trim and lowercase an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// `tunnistamo-<digest>@<domain>`.
pub fn placeholder_address(digest: &str, domain: &str) -> String {
    format!("{PLACEHOLDER_PREFIX}{digest}@{domain}")
}

/// True for addresses generated by [`placeholder_address`], whatever the
/// domain.
pub fn is_generated_address(email: &str) -> bool {
    Regex::new(r"^tunnistamo-[0-9a-f]{32}@[^@\s]+$")
        .is_ok_and(|re| re.is_match(&normalize_email(email)))
}

fn domain_of(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain)
}

/// True when the domain, or any parent of it, is a known throwaway service.
pub fn is_disposable(email: &str, disposable_domains: &[String]) -> bool {
    let Some(domain) = domain_of(email) else {
        return false;
    };
    let domain = domain.to_lowercase();
    disposable_domains.iter().any(|blocked| {
        domain == *blocked
            || domain
                .strip_suffix(blocked.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
    })
}

/// Validate a candidate email, returning its normalized form.
pub fn validate_candidate(
    email: &str,
    disposable_domains: &[String],
) -> Result<String, VerificationError> {
    let email = normalize_email(email);
    if !valid_email(&email) || is_generated_address(&email) {
        return Err(VerificationError::InvalidEmail);
    }
    if is_disposable(&email, disposable_domains) {
        return Err(VerificationError::DisposableEmail);
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked() -> Vec<String> {
        vec!["mailinator.com".to_string(), "yopmail.com".to_string()]
    }

    #[test]
    fn validates_syntax() {
        assert!(valid_email("marja@example.org"));
        assert!(!valid_email("marja@example"));
        assert!(!valid_email("marja example@example.org"));
        assert!(!valid_email(""));
    }

    #[test]
    fn normalizes_candidates() {
        assert_eq!(
            validate_candidate("  Marja@Example.ORG ", &blocked()).unwrap(),
            "marja@example.org"
        );
    }

    #[test]
    fn rejects_disposable_domains_and_subdomains() {
        assert!(matches!(
            validate_candidate("x@mailinator.com", &blocked()),
            Err(VerificationError::DisposableEmail)
        ));
        assert!(matches!(
            validate_candidate("x@eu.yopmail.com", &blocked()),
            Err(VerificationError::DisposableEmail)
        ));
        assert!(validate_candidate("x@notmailinator.com", &blocked()).is_ok());
    }

    #[test]
    fn placeholders_are_recognized_and_refused() {
        let placeholder = placeholder_address("0123456789abcdef0123456789abcdef", "org.example");
        assert!(is_generated_address(&placeholder));
        assert!(!is_generated_address("tunnistamo-fan@example.org"));
        assert!(matches!(
            validate_candidate(&placeholder, &blocked()),
            Err(VerificationError::InvalidEmail)
        ));
    }
}
