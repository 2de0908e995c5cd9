//! Error types for field extraction.

use thiserror::Error;

use crate::retry::{Classify, FailureType};

/// Errors raised while turning a raw document into fields.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// A required field was not present on the page.
    #[error("missing field '{field}' on {url}")]
    MissingField {
        /// Field name.
        field: &'static str,
        /// Page URL.
        url: String,
    },

    /// A field was present but could not be interpreted.
    #[error("unparseable {field} '{value}'")]
    Unparseable {
        /// Field name.
        field: &'static str,
        /// Raw value as found on the page.
        value: String,
    },

    /// An extraction rule failed to compile or lacks a required group.
    #[error("invalid extraction rule '{rule}': {message}")]
    InvalidRule {
        /// Rule name.
        rule: String,
        /// Why the rule was rejected.
        message: String,
    },
}

impl ExtractError {
    /// Creates a missing-field error.
    pub fn missing(field: &'static str, url: impl Into<String>) -> Self {
        Self::MissingField {
            field,
            url: url.into(),
        }
    }

    /// Creates an unparseable-field error.
    pub fn unparseable(field: &'static str, value: impl Into<String>) -> Self {
        Self::Unparseable {
            field,
            value: value.into(),
        }
    }

    /// Creates an invalid-rule error.
    pub fn invalid_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

impl Classify for ExtractError {
    /// Page structure does not change between attempts.
    fn failure_type(&self) -> FailureType {
        FailureType::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_errors_are_permanent() {
        assert_eq!(
            ExtractError::missing("title", "https://example.com/movie/1").failure_type(),
            FailureType::Permanent
        );
        assert_eq!(
            ExtractError::unparseable("year", "soon").failure_type(),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_missing_field_message() {
        let msg = ExtractError::missing("title", "https://example.com/movie/1").to_string();
        assert!(msg.contains("title"));
        assert!(msg.contains("https://example.com/movie/1"));
    }
}
