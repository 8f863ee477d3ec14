//! Daemon error types.
//!
//! Probe failures are transient by design: they are logged and surface as
//! "no data this cycle", never as a daemon exit. Only startup-time failures
//! (store connect, singleton lock) abort the process.

use thiserror::Error;

/// Failure of a single external probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("command failed: {message}")]
    Command {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("failed to parse probe output: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("probe endpoint unavailable: {message}")]
    Unavailable { message: String },

    /// The workspace directory no longer exists. Signals removal from the
    /// registry rather than an error condition.
    #[error("directory vanished: {path}")]
    DirectoryVanished { path: String },
}

impl ProbeError {
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
            source: None,
        }
    }

    pub fn command_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Command {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn parse_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Parse {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Coordination-store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("store operation failed: {message}")]
    Operation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
            source: None,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable {
                message: err.to_string(),
                source: Some(Box::new(err)),
            }
        } else {
            StoreError::Operation {
                message: err.to_string(),
                source: Some(Box::new(err)),
            }
        }
    }
}

/// Top-level daemon failure.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("lock error: {message}")]
    Lock { message: String },
}
