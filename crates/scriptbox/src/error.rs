use std::fmt;

use crate::{config::ConfigError, interpreter::InitError, registry::SessionError, remote::RemoteError};

/// Errors returned by the [`Engine`](crate::Engine).
///
/// Program failures are not errors: they come back as an
/// [`ExecutionResult`](crate::ExecutionResult) with a non-success status.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The local interpreter could not be started and no remote fallback is configured.
    Initialization(InitError),
    /// A session registry operation failed.
    Session(SessionError),
    /// `resume` was called on a run that is not waiting for input.
    NotAwaitingInput,
    /// The remote fallback failed after local initialization failed.
    Remote(RemoteError),
    Config(ConfigError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization(error) => write!(f, "{error}"),
            Self::Session(error) => write!(f, "{error}"),
            Self::NotAwaitingInput => f.write_str("run is not waiting for input"),
            Self::Remote(error) => write!(f, "remote execution failed: {error}"),
            Self::Config(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<SessionError> for EngineError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Initialization(error) => Self::Initialization(error),
            other => Self::Session(other),
        }
    }
}

impl From<InitError> for EngineError {
    fn from(error: InitError) -> Self {
        Self::Initialization(error)
    }
}

impl From<RemoteError> for EngineError {
    fn from(error: RemoteError) -> Self {
        Self::Remote(error)
    }
}

impl From<ConfigError> for EngineError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}
