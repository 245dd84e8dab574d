//! Form checks that run before anything is sent to the backend.

use std::sync::LazyLock;

use regex::Regex;

use crate::{entities::Credentials, error::ValidationError};

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid"));

const MIN_PASSWORD_LEN: usize = 8;

/// Coarse `local@domain.tld` shape check. Not RFC 5322.
pub fn validate_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

/// At least eight characters with a lowercase letter, an uppercase letter,
/// a digit and a symbol. Letter and digit classes are ASCII; any character
/// that is not an ASCII letter or digit (underscore included) is a symbol.
/// Length is counted in Unicode scalar values, so an emoji counts once.
pub fn validate_password(password: &str) -> bool {
    // line terminators never match, the whole password must sit on one line
    if password.chars().any(is_line_terminator) {
        return false;
    }

    password.chars().count() >= MIN_PASSWORD_LEN
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| !c.is_ascii_alphanumeric())
}

/// Runs the registration checks in order and stops at the first failure.
pub fn validate_registration(credentials: &Credentials) -> Result<(), ValidationError> {
    if credentials.email.is_empty() || credentials.password.is_empty() {
        return Err(ValidationError::MissingCredentials);
    }

    if !validate_email(&credentials.email) {
        return Err(ValidationError::InvalidEmail);
    }

    if !validate_password(&credentials.password) {
        return Err(ValidationError::WeakPassword);
    }

    Ok(())
}

/// Trimmed record text, or `EmptyText` when nothing but whitespace is left.
pub fn validate_record_text(text: &str) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(trimmed)
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}
