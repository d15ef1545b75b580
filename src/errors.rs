//! # Criteria Errors
//!
//! Every fallible operation in this crate returns [`CriteriaError`]. The taxonomy
//! mirrors the pipeline a raw criteria string travels through:
//!
//! - **Decoding** (`MalformedFilterString`, `MalformedSortString`, ...) fails fast on
//!   the first syntax problem. No semantic validation is attempted afterwards.
//! - **Validation** (`ValidationFailed`) is batched: every violation found in one
//!   pass is reported, keyed by the field path it belongs to.
//! - **Compilation** (`UnsupportedOperator`, `UnknownRelation`, `NoDriverFound`)
//!   is raised by query drivers and returned to the caller verbatim.
//!
//! ## HTTP responses
//!
//! Like the rest of the error handling in this family of crates, errors know
//! their HTTP status and implement [`IntoResponse`]. Validation failures render
//! as `422` with the field map under `details`:
//!
//! ```json
//! {
//!   "error": "Validation failed",
//!   "details": { "filters.0.value": ["The value of `age` must be of type integer."] }
//! }
//! ```
//!
//! Driver-side failures are logged with `tracing` and answered with a generic
//! message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

use crate::filtering::OperatorKind;

pub type Result<T, E = CriteriaError> = std::result::Result<T, E>;

///
/// ValidationErrors
///
/// Field key → ordered list of human-readable messages. This is the format
/// consumed by generic validation-error responders.
///

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message under `key`, keeping insertion order per key.
    pub fn add(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(message.into());
    }

    pub fn extend(&mut self, other: Self) {
        for (key, messages) in other.0 {
            self.0.entry(key).or_default().extend(messages);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct field keys with errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// All messages, flattened in key order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.0.values().flatten().cloned().collect()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }

    /// `Ok(())` when nothing was recorded, otherwise `ValidationFailed`.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CriteriaError::ValidationFailed(self))
        }
    }

    fn summary(&self) -> String {
        let messages = self.messages();
        if messages.len() == 1 {
            messages[0].clone()
        } else {
            format!("Validation failed: {}", messages.join(", "))
        }
    }
}

///
/// CriteriaError
///

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum CriteriaError {
    #[error("unknown filter operator `{token}`")]
    UnknownOperator { token: String },

    #[error("invalid value for `{attribute}` with operator `{operator}`: {reason}")]
    InvalidValueShape {
        attribute: String,
        operator: OperatorKind,
        reason: String,
    },

    #[error("malformed filter string at position {position}: {reason}")]
    MalformedFilterString { position: usize, reason: String },

    #[error("malformed sort string: {reason}")]
    MalformedSortString { reason: String },

    #[error("malformed text search string: {reason}")]
    MalformedTextSearchString { reason: String },

    #[error("malformed pagination: {reason}")]
    MalformedPagination { reason: String },

    #[error("operator `{operator}` is not supported by the {driver} driver")]
    UnsupportedOperator {
        driver: &'static str,
        operator: OperatorKind,
    },

    #[error("relation `{relation}` is not known to the {driver} driver")]
    UnknownRelation {
        driver: &'static str,
        relation: String,
    },

    #[error("no query driver registered for context type `{context}`")]
    NoDriverFound { context: &'static str },

    #[error("{}", .0.summary())]
    ValidationFailed(ValidationErrors),
}

impl CriteriaError {
    pub(crate) fn malformed_filter(position: usize, reason: impl Into<String>) -> Self {
        Self::MalformedFilterString {
            position,
            reason: reason.into(),
        }
    }

    /// True for errors caused by client input rather than by the backend setup.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::UnsupportedOperator { .. } | Self::UnknownRelation { .. } | Self::NoDriverFound { .. }
        )
    }

    /// HTTP status for this error
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnsupportedOperator { .. }
            | Self::UnknownRelation { .. }
            | Self::NoDriverFound { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to send to clients
    #[must_use]
    pub fn user_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "The query could not be compiled".to_string()
        }
    }

    fn log_internal(&self) {
        if self.is_client_error() {
            tracing::debug!(
                error = %self,
                status = %self.status_code(),
                "criteria rejected"
            );
        } else {
            tracing::error!(error = %self, "criteria compilation failed");
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ValidationErrors>,
}

impl IntoResponse for CriteriaError {
    fn into_response(self) -> Response {
        self.log_internal();

        let status = self.status_code();
        let body = match self {
            Self::ValidationFailed(errors) => ErrorResponse {
                error: "Validation failed".to_string(),
                details: Some(errors),
            },
            other => ErrorResponse {
                error: other.user_message(),
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_keep_order_per_key() {
        let mut errors = ValidationErrors::new();
        errors.add("filters.0.value", "first");
        errors.add("filters.0.value", "second");
        errors.add("sort", "bad direction");

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.get("filters.0.value"),
            Some(&["first".to_string(), "second".to_string()][..])
        );
        assert_eq!(errors.messages().len(), 3);
    }

    #[test]
    fn test_validation_errors_extend_merges_keys() {
        let mut left = ValidationErrors::new();
        left.add("sort", "a");
        let mut right = ValidationErrors::new();
        right.add("sort", "b");
        right.add("search", "c");

        left.extend(right);
        assert_eq!(left.get("sort").map(<[String]>::len), Some(2));
        assert!(left.get("search").is_some());
    }

    #[test]
    fn test_empty_validation_errors_into_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_single_validation_message_is_display() {
        let mut errors = ValidationErrors::new();
        errors.add("sort", "Sorting by `secret` is not allowed.");
        let err = CriteriaError::ValidationFailed(errors);
        assert_eq!(err.to_string(), "Sorting by `secret` is not allowed.");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_multiple_validation_messages_are_joined() {
        let mut errors = ValidationErrors::new();
        errors.add("a", "one");
        errors.add("b", "two");
        let err = CriteriaError::ValidationFailed(errors);
        assert_eq!(err.to_string(), "Validation failed: one, two");
    }

    #[test]
    fn test_malformed_is_bad_request() {
        let err = CriteriaError::malformed_filter(3, "unbalanced `[`");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("position 3"));
    }

    #[test]
    fn test_driver_errors_are_sanitized() {
        let err = CriteriaError::UnsupportedOperator {
            driver: "sea-query",
            operator: OperatorKind::Contains,
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "The query could not be compiled");
        assert!(err.to_string().contains("contains"));
    }

    #[test]
    fn test_into_response_status() {
        let err = CriteriaError::UnknownOperator {
            token: "bogus".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
