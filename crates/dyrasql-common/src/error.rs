//! Error types for DyraSQL services

use std::fmt;

/// Result type alias using DyraError
pub type Result<T> = std::result::Result<T, DyraError>;

/// Main error type for DyraSQL services
#[derive(Debug, thiserror::Error)]
pub enum DyraError {
    /// Statement cannot be normalized or analyzed
    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    /// Decision cache / history store unreachable
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Backend execution cluster unreachable or failed at transport level
    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    /// Required identity missing from the request
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DyraError {
    /// Create an internal error from any error type
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        DyraError::Internal(err.to_string())
    }

    /// Get the error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            DyraError::QuerySyntax(_) => "QUERY_SYNTAX_ERROR",
            DyraError::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            DyraError::ClusterUnavailable(_) => "CLUSTER_UNAVAILABLE",
            DyraError::Unauthorized(_) => "UNAUTHORIZED",
            DyraError::Config(_) => "CONFIG_ERROR",
            DyraError::Serialization(_) => "SERIALIZATION_ERROR",
            DyraError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<serde_json::Error> for DyraError {
    fn from(err: serde_json::Error) -> Self {
        DyraError::Serialization(err.to_string())
    }
}
