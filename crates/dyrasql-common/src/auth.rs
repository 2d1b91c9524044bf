//! Caller identity
//!
//! The router only checks that an identity is present; credentials and
//! permissions are enforced by the execution clusters themselves.

use crate::error::{DyraError, Result};
use serde::{Deserialize, Serialize};

/// User identity extracted from the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// User name as sent by the client
    pub user_id: String,
    /// Client-reported source (driver or tool name)
    pub source: Option<String>,
}

impl UserIdentity {
    /// Create a new user identity
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            source: None,
        }
    }

    /// Build an identity from the raw identity header value.
    ///
    /// A missing or blank value is rejected.
    pub fn from_header(header_name: &str, value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            Some(user) if !user.is_empty() => Ok(Self::new(user)),
            _ => Err(DyraError::Unauthorized(format!(
                "missing required header {}",
                header_name
            ))),
        }
    }

    /// Attach the client source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_header() {
        let id = UserIdentity::from_header("X-Trino-User", Some(" alice ")).unwrap();
        assert_eq!(id.user_id, "alice");
        assert!(id.source.is_none());
    }

    #[test]
    fn test_missing_identity_rejected() {
        let err = UserIdentity::from_header("X-Trino-User", None).unwrap_err();
        assert!(matches!(err, DyraError::Unauthorized(_)));
        assert!(err.to_string().contains("X-Trino-User"));

        let err = UserIdentity::from_header("X-Trino-User", Some("   ")).unwrap_err();
        assert!(matches!(err, DyraError::Unauthorized(_)));
    }

    #[test]
    fn test_with_source() {
        let id = UserIdentity::new("bob").with_source("trino-jdbc");
        assert_eq!(id.user_id, "bob");
        assert_eq!(id.source.as_deref(), Some("trino-jdbc"));
    }
}
