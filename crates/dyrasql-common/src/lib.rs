//! DyraSQL Common Library
//!
//! Shared types and utilities for the DyraSQL routing services.

pub mod auth;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use auth::UserIdentity;
pub use error::{DyraError, Result};
