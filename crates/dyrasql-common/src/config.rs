//! Validation helpers for DyraSQL configuration

use crate::error::{DyraError, Result};

/// Split a comma separated list, trimming and lowercasing entries
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reject a value outside the closed unit interval
pub fn ensure_unit_interval(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DyraError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

/// Reject zero for options that bound time or size
pub fn ensure_positive(name: &str, value: u64) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(DyraError::Config(format!("{} must be greater than zero", name)))
    }
}

/// Reject blank strings
pub fn ensure_non_empty(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(DyraError::Config(format!("{} must not be empty", name)))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" Date, dt ,,YEAR"), vec!["date", "dt", "year"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_unit_interval() {
        assert!(ensure_unit_interval("w", 0.0).is_ok());
        assert!(ensure_unit_interval("w", 1.0).is_ok());
        assert!(ensure_unit_interval("w", 1.01).is_err());
        assert!(ensure_unit_interval("w", f64::NAN).is_err());
    }

    #[test]
    fn test_positive_and_non_empty() {
        assert!(ensure_positive("ttl", 1).is_ok());
        assert!(ensure_positive("ttl", 0).is_err());
        assert!(ensure_non_empty("url", "http://x").is_ok());
        assert!(ensure_non_empty("url", "  ").is_err());
    }
}
