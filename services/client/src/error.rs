//! services/client/src/error.rs
//!
//! Defines the primary error type for the quiz client service.

use crate::app::quiz_flow::QuizFlowError;
use crate::app::session::SessionError;
use crate::config::ConfigError;
use quiz_core::ports::PortError;

/// The primary error type for the `client` service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// A session action was refused or failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Quiz error: {0}")]
    Quiz(#[from] QuizFlowError),

    /// Represents an error from the underlying HTTP client library.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Represents a standard Input/Output error (e.g., reading the terminal).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
