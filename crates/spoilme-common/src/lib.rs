//! # Spoil Me Common
//!
//! Shared error type and logging configuration for the Spoil Me Vintage
//! delivery crates.
//!
//! ## Features
//!
//! - Unified error type for configuration and input failures
//! - Logging configuration and setup

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type shared across the workspace.
#[derive(Error, Debug)]
pub enum SpoilMeError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl SpoilMeError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            SpoilMeError::Config { .. } => "config",
            SpoilMeError::Io(_) => "io",
            SpoilMeError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for workspace operations.
pub type Result<T> = std::result::Result<T, SpoilMeError>;
