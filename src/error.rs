use std::path::PathBuf;

use thiserror::Error;

/// Failures a session renders in-band. None of them is retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The transport could not be established.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// The transport broke after it was established.
    #[error("stream interrupted: {message}")]
    Transport { message: String },

    #[error("failed to export to {}: {message}", path.display())]
    Export { path: PathBuf, message: String },
}

impl SessionError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}
