//! Field validators shared by request payloads and services

use crate::errors::{AppError, Result};
use chrono::{Datelike, Utc};
use regex_lite::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use validator::ValidationError;

/// Usernames that collide with URL shortcuts
pub const RESERVED_USERNAMES: &[&str] = &["me"];

pub const SLUG_MAX_LEN: usize = 50;

fn disallowed_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static pattern"))
}

/// Distinct characters outside `[A-Za-z0-9_-]`, in order of appearance
pub fn disallowed_chars(value: &str) -> String {
    let mut found = String::new();
    for m in disallowed_pattern().find_iter(value) {
        for c in m.as_str().chars() {
            if !found.contains(c) {
                found.push(c);
            }
        }
    }
    found
}

fn error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Owned(message));
    err
}

pub fn validate_username(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Err(error("required", "username must not be empty".to_string()));
    }

    if RESERVED_USERNAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(value))
    {
        return Err(error("reserved", format!("'{value}' cannot be used as a username")));
    }

    let bad = disallowed_chars(value);
    if !bad.is_empty() {
        return Err(error(
            "charset",
            format!("username contains disallowed characters: {bad}"),
        ));
    }

    Ok(())
}

pub fn validate_slug(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() || value.chars().count() > SLUG_MAX_LEN {
        return Err(error(
            "length",
            format!("slug must be between 1 and {SLUG_MAX_LEN} characters"),
        ));
    }

    let bad = disallowed_chars(value);
    if !bad.is_empty() {
        return Err(error("charset", format!("slug contains disallowed characters: {bad}")));
    }

    Ok(())
}

/// Titles cannot be released after the current calendar year
pub fn validate_year(year: i32) -> Result<()> {
    let current = Utc::now().year();
    if year > current {
        return Err(AppError::validation(
            "year",
            format!("year {year} is later than the current year {current}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_username_any_case() {
        for name in ["me", "Me", "ME"] {
            let err = validate_username(name).unwrap_err();
            assert_eq!(err.code, "reserved");
        }
        assert!(validate_username("meme").is_ok());
    }

    #[test]
    fn test_username_charset_reports_offenders() {
        let err = validate_username("bad name!!").unwrap_err();
        assert_eq!(err.code, "charset");
        assert_eq!(
            err.message.as_deref(),
            Some("username contains disallowed characters:  !")
        );
        assert!(validate_username("good_name-42").is_ok());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn test_slug_rules() {
        assert!(validate_slug("sci-fi").is_ok());
        assert!(validate_slug("sci fi").is_err());
        assert!(validate_slug(&"a".repeat(SLUG_MAX_LEN)).is_ok());
        assert!(validate_slug(&"a".repeat(SLUG_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_year_not_in_future() {
        let current = Utc::now().year();
        assert!(validate_year(current).is_ok());
        assert!(validate_year(1603).is_ok());

        let err = validate_year(current + 1).unwrap_err();
        assert_eq!(err.field(), Some("year"));
    }

    #[test]
    fn test_disallowed_chars_are_deduplicated() {
        assert_eq!(disallowed_chars("a@b@c#"), "@#");
        assert_eq!(disallowed_chars("plain"), "");
    }
}
