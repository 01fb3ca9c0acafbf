//! Input validation for identifiers crossing the service boundary

use regex::Regex;
use std::sync::OnceLock;

const MAX_USER_ID_LEN: usize = 128;
const MAX_LOCATION_LEN: usize = 64;
const MAX_OPERATOR_ID_LEN: usize = 128;

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+$").expect("Failed to compile identifier regex")
    })
}

/// Validate a credential holder id
pub fn validate_user_id(user_id: &str) -> Result<(), String> {
    if user_id.is_empty() {
        return Err("User id is required".to_string());
    }

    if user_id.len() > MAX_USER_ID_LEN {
        return Err(format!(
            "User id must be at most {} characters long",
            MAX_USER_ID_LEN
        ));
    }

    if !identifier_regex().is_match(user_id) {
        return Err(
            "User id can only contain letters, numbers, underscores and dashes".to_string(),
        );
    }

    Ok(())
}

/// Validate a scan station location label
pub fn validate_location(location: &str) -> Result<(), String> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err("Location is required".to_string());
    }

    if location.chars().count() > MAX_LOCATION_LEN {
        return Err(format!(
            "Location must be at most {} characters long",
            MAX_LOCATION_LEN
        ));
    }

    if location.chars().any(char::is_control) {
        return Err("Location must not contain control characters".to_string());
    }

    Ok(())
}

/// Validate an operator identity taken from a station credential
pub fn validate_operator_id(operator_id: &str) -> Result<(), String> {
    if operator_id.is_empty() || operator_id.len() > MAX_OPERATOR_ID_LEN {
        return Err("Operator id must be between 1 and 128 characters".to_string());
    }

    if operator_id.chars().any(char::is_control) {
        return Err("Operator id must not contain control characters".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("U1").is_ok());
        assert!(validate_user_id("a-b_C9").is_ok());
        assert!(validate_user_id(&"x".repeat(MAX_USER_ID_LEN)).is_ok());

        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("u/1").is_err());
        assert!(validate_user_id("ü").is_err());
        assert!(validate_user_id(&"x".repeat(MAX_USER_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_location() {
        assert!(validate_location("Main Gate, floor 1").is_ok());
        assert!(validate_location("   ").is_err());
        assert!(validate_location("gate\n2").is_err());
        assert!(validate_location(&"g".repeat(MAX_LOCATION_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_operator_id() {
        assert!(validate_operator_id("admin@library.example").is_ok());
        assert!(validate_operator_id("").is_err());
        assert!(validate_operator_id("op\u{0}").is_err());
    }
}
