//! Error types for the Superia core clients

use std::time::Duration;
use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by configuration loading and the vendor text-generation clients.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A required credential is absent. Fatal to the operation, never retried.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// The endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Response decode error: {0}")]
    Decode(String),

    /// An assistant run reached a terminal status other than `completed`.
    #[error("Run failed with status: {status}. Error: {message}")]
    RunFailed { status: String, message: String },

    #[error("Run still pending after {elapsed:?}")]
    PollTimeout { elapsed: Duration },

    #[error("Empty response: {0}")]
    EmptyResponse(String),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// True for errors the user can fix by re-submitting (transport, HTTP, run outcome).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Http { .. }
                | CoreError::Transport(_)
                | CoreError::RunFailed { .. }
                | CoreError::PollTimeout { .. }
        )
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CoreError::Decode(err.to_string())
        } else {
            CoreError::Transport(err.to_string())
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}
