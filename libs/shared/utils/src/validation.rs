use std::sync::OnceLock;

use regex::Regex;

use shared_config::VerificationPolicy;
use shared_models::FieldError;

const MAX_EMAIL_LENGTH: usize = 254;

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").ok())
        .as_ref()
}

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    email.len() <= MAX_EMAIL_LENGTH && email_pattern().map(|re| re.is_match(email)).unwrap_or(false)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Strips separators and a leading `+`; accepts 7 to 15 remaining digits.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let trimmed = phone.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

pub fn is_six_digit_code(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}

/// Length and confirmation checks for a new password.
pub fn password_errors(
    field: &str,
    password: &str,
    confirmation: &str,
    policy: &VerificationPolicy,
) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let length = password.chars().count();

    if length < policy.min_password_length {
        errors.push(FieldError::new(
            field,
            "too_short",
            format!("Password must be at least {} characters long", policy.min_password_length),
        ));
    } else if length > policy.max_password_length {
        errors.push(FieldError::new(
            field,
            "too_long",
            format!("Password must be at most {} characters long", policy.max_password_length),
        ));
    }

    if password != confirmation {
        errors.push(FieldError::new("confirm_password", "mismatch", "Passwords do not match"));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email(" jane.doe+clinic@mail.example.org "));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email(&format!("{}@b.com", "a".repeat(260))));
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+1 (555) 123-4567").as_deref(), Some("15551234567"));
        assert_eq!(normalize_phone("555.1234").as_deref(), Some("5551234"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("555-CALL-NOW"), None);
    }

    #[test]
    fn password_rules_report_every_problem() {
        let policy = VerificationPolicy::default();
        let errors = password_errors("password", "short", "other", &policy);
        let codes: Vec<_> = errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["too_short", "mismatch"]);
        assert!(password_errors("password", "long enough", "long enough", &policy).is_empty());
    }
}
