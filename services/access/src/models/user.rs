//! Credential holder identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a credential holder
///
/// The admin directory assigns these; the access core never interprets them
/// beyond equality and the character rules in [`crate::validation`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Build a user id after checking it against the identifier rules
    pub fn parse(raw: &str) -> Result<Self, String> {
        crate::validation::validate_user_id(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a value that was already validated upstream (authenticated token
    /// payloads, rows written by this service)
    pub(crate) fn from_trusted(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_directory_ids() {
        let id = UserId::parse("kX9_qP2-77").unwrap();
        assert_eq!(id.as_str(), "kX9_qP2-77");
        assert_eq!(id.to_string(), "kX9_qP2-77");
    }

    #[test]
    fn test_parse_rejects_bad_ids() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("has space").is_err());
        assert!(UserId::parse(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = UserId::parse("U1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"U1\"");
    }
}
