//! Error handling and classification for the DyraSQL gateway
//!
//! This module provides:
//! - Classification of error messages returned by execution clusters for EXPLAIN requests
//! - Mapping of gateway errors onto HTTP responses without leaking internal detail

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dyrasql_common::DyraError;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;
use regex::Regex;
use tracing::error;

static LINE_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^line \d+:\d+:\s*").expect("constant pattern"));

/// Fragments that identify a failure to resolve a stored view or its catalog
const VIEW_ERROR_MARKERS: &[&str] = &[
    "failed analyzing stored view",
    "catalog",
    "not found",
    "view",
    "cannot be resolved",
];

/// Error category for explain failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The statement itself is malformed; routing must abort
    Syntax,
    /// A view or its catalog cannot be resolved; further explains are pointless
    View,
    /// Explain request timed out
    Timeout,
    /// Explain cluster unreachable
    Connection,
    /// Anything else; the fallback chain continues
    Other,
}

impl ErrorCategory {
    /// Whether the next explain strategy is worth trying
    pub fn continues_fallback(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout | ErrorCategory::Connection | ErrorCategory::Other
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "syntax"),
            ErrorCategory::View => write!(f, "view"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Other => write!(f, "other"),
        }
    }
}

/// A classified explain error
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    /// User-facing message
    pub message: String,
    /// Original raw error (for logging)
    pub raw_error: String,
}

impl ClassifiedError {
    pub fn new(category: ErrorCategory, message: impl Into<String>, raw_error: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            raw_error: raw_error.into(),
        }
    }
}

/// Classify an error returned by a cluster for an EXPLAIN statement.
///
/// `error_name` is the cluster's symbolic error name when the response carried one.
pub fn classify_explain_error(error_name: Option<&str>, raw_error: &str) -> ClassifiedError {
    let error_lower = raw_error.to_lowercase();

    if error_name == Some("SYNTAX_ERROR")
        || error_lower.contains("mismatched input")
        || error_lower.contains("extraneous input")
        || error_lower.contains("syntax error")
    {
        return ClassifiedError::new(
            ErrorCategory::Syntax,
            extract_core_message(raw_error),
            raw_error,
        );
    }

    if VIEW_ERROR_MARKERS.iter().any(|m| error_lower.contains(m)) {
        return ClassifiedError::new(ErrorCategory::View, extract_core_message(raw_error), raw_error);
    }

    if error_lower.contains("timeout") || error_lower.contains("timed out") {
        return ClassifiedError::new(ErrorCategory::Timeout, "Explain request timed out", raw_error);
    }

    if error_lower.contains("connection")
        || error_lower.contains("connect")
        || error_lower.contains("unreachable")
    {
        return ClassifiedError::new(
            ErrorCategory::Connection,
            "Explain cluster unreachable",
            raw_error,
        );
    }

    ClassifiedError::new(ErrorCategory::Other, extract_core_message(raw_error), raw_error)
}

/// Extract the core message from a verbose error string
fn extract_core_message(error: &str) -> String {
    let first_line = error.lines().next().unwrap_or_default().trim();
    let msg = LINE_PREFIX_REGEX.replace(first_line, "");

    if msg.chars().count() > 500 {
        let truncated: String = msg.chars().take(497).collect();
        format!("{}...", truncated)
    } else {
        msg.into_owned()
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Gateway error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub DyraError);

impl From<DyraError> for ApiError {
    fn from(err: DyraError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DyraError::QuerySyntax(_) => StatusCode::BAD_REQUEST,
            DyraError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DyraError::ClusterUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            DyraError::QuerySyntax(_) | DyraError::Unauthorized(_) => self.0.to_string(),
            DyraError::ClusterUnavailable(_) => "Execution cluster unavailable".to_string(),
            other => {
                error!("Internal error: {}", other);
                "Internal server error".to_string()
            }
        };
        let code = match &self.0 {
            DyraError::QuerySyntax(_)
            | DyraError::Unauthorized(_)
            | DyraError::ClusterUnavailable(_) => self.0.code(),
            _ => "INTERNAL",
        };
        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error() {
        let classified = classify_explain_error(
            Some("SYNTAX_ERROR"),
            "line 1:8: mismatched input 'FROMM'. Expecting: <expression>",
        );
        assert_eq!(classified.category, ErrorCategory::Syntax);
        assert!(classified.message.starts_with("mismatched input"));
        assert!(!classified.category.continues_fallback());
    }

    #[test]
    fn test_view_error() {
        let classified = classify_explain_error(
            None,
            "line 3:6: Failed analyzing stored view 'iceberg.sales.v_orders': Catalog 'legacy' not found",
        );
        assert_eq!(classified.category, ErrorCategory::View);
        assert!(!classified.category.continues_fallback());
    }

    #[test]
    fn test_other_error_continues() {
        let classified = classify_explain_error(Some("GENERIC_INTERNAL_ERROR"), "Query exceeded limits");
        assert_eq!(classified.category, ErrorCategory::Other);
        assert!(classified.category.continues_fallback());
    }

    #[test]
    fn test_timeout_and_connection() {
        assert_eq!(
            classify_explain_error(None, "operation timed out").category,
            ErrorCategory::Timeout
        );
        assert_eq!(
            classify_explain_error(None, "error sending request: connection refused").category,
            ErrorCategory::Connection
        );
    }

    #[test]
    fn test_extract_core_message() {
        assert_eq!(
            extract_core_message("line 1:15: Column 'x' cannot be used\nstack"),
            "Column 'x' cannot be used"
        );
        let long = "e".repeat(600);
        assert_eq!(extract_core_message(&long).chars().count(), 500);
    }

    #[test]
    fn test_api_error_status() {
        assert_eq!(
            ApiError(DyraError::QuerySyntax("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(DyraError::Unauthorized("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(DyraError::ClusterUnavailable("ecs".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(DyraError::internal("secret detail")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
