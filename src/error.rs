//! Error types for fixturegres
//!
//! This module defines the error hierarchy used throughout the harness.
//! We use `thiserror` for library-style errors with clear error chains.
//!
//! The split mirrors how failures propagate through a test run:
//! - [`FixtureError`]: provisioning and lifecycle errors, fatal to the run
//! - [`DbError`]: per-operation errors, reported per scenario
//! - [`ConfigError`]: configuration loading problems

use std::io;
use std::time::Duration;

use crate::fixture::FixtureState;

/// Main error type for the harness
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Fixture lifecycle errors
    #[error("Fixture error: {0}")]
    Fixture(#[from] FixtureError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Fixture lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    /// The runtime could not allocate or start the instance
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// The instance started but never accepted connections
    #[error("Instance did not become ready within {0:?}")]
    ReadinessTimeout(Duration),

    /// Operation not valid in the handle's current state
    #[error("Fixture is {actual}, expected {expected}")]
    InvalidState {
        expected: FixtureState,
        actual: FixtureState,
    },

    /// Stopping the instance failed
    #[error("Teardown failed: {0}")]
    Teardown(String),
}

impl FixtureError {
    /// Whether this error belongs to the provisioning class (aborts the run)
    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::Provisioning(_) | Self::ReadinessTimeout(_))
    }
}

/// Database operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    /// Failed to establish connection, or the connection dropped
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Statement rejected by the server (syntax, missing relation, constraint)
    #[error("Query execution failed: {message}")]
    QueryFailed {
        sqlstate: Option<String>,
        message: String,
    },

    /// Schema setup failed
    #[error("Schema setup failed: {0}")]
    SetupFailed(String),

    /// The caller's cancellation signal stopped the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The server aborted the statement on its own timeout
    #[error("Operation timed out")]
    Timeout,

    /// The fixture handle cannot serve connections
    #[error("Fixture unavailable: {0}")]
    FixtureUnavailable(String),

    /// The fixture was torn down while the operation was in flight
    #[error("Fixture disposed while operation was in flight")]
    FixtureDisposed,
}

/// SQLSTATE for "relation does not exist"
const UNDEFINED_TABLE: &str = "42P01";

impl DbError {
    /// Build a query error without an SQLSTATE
    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryFailed {
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Whether the error says the target relation does not exist
    pub fn is_undefined_table(&self) -> bool {
        matches!(self, Self::QueryFailed { sqlstate: Some(code), .. } if code == UNDEFINED_TABLE)
    }

    /// Whether the error is the expected result of a caller cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Configuration loading/parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Home directory not found
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Config or schema file not found
    #[error("File not found: {0}")]
    NotFound(String),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Specialized Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Specialized Result type for fixture operations
pub type FixtureResult<T> = std::result::Result<T, FixtureError>;

/// Specialized Result type for database operations
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Specialized Result type for config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
