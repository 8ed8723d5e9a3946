//! Error types for lspbind

use thiserror::Error;

use crate::infra::lsp::protocol::{ResponseError, error_codes};

#[derive(Debug, Error)]
pub enum BinderError {
    #[error("{0}")]
    Lsp(#[from] LspError),

    #[error("{0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Faults on a single server connection.
#[derive(Debug, Error)]
pub enum LspError {
    #[error("Failed to launch server: {0}")]
    Launch(String),

    #[error("Server not connected")]
    NotConnected,

    #[error("Server closed the connection")]
    ConnectionClosed,

    #[error("'{method}' timed out after {millis}ms")]
    Timeout { method: String, millis: u64 },

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Server error [{code}]: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LspError {
    pub fn error_code(&self) -> i32 {
        match self {
            Self::ServerError { code, .. } => *code,
            Self::ConnectionClosed => error_codes::CONNECTION_CLOSED,
            Self::Timeout { .. } => -32001,
            Self::NotConnected => -32003,
            Self::RequestCancelled => error_codes::REQUEST_CANCELLED,
            _ => -32000,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::RequestCancelled)
            || matches!(self, Self::ServerError { code, .. } if *code == error_codes::REQUEST_CANCELLED)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the connection itself is gone, as opposed to one call failing.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::NotConnected)
            || matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
    }

    pub fn is_recoverable(&self) -> bool {
        self.is_connection_lost() || self.is_timeout() || self.is_cancelled()
    }
}

impl From<ResponseError> for LspError {
    fn from(err: ResponseError) -> Self {
        LspError::ServerError {
            code: err.code,
            message: err.message,
        }
    }
}

/// Failures while resolving or creating a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No server provider accepted content type '{content_type}'")]
    NoProvider { content_type: String },

    #[error("Attaching {root} needs at least one file extension")]
    NoExtensions { root: std::path::PathBuf },

    #[error("{server} exited before completing the handshake")]
    ProcessExited { server: String },

    #[error("{0}")]
    Lsp(#[from] LspError),
}

/// Outcome of a background task run that did not complete.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A local wait was interrupted; the run is re-submitted.
    #[error("Wait interrupted")]
    Interrupted,

    /// The remote call failed; the run is dropped for this cycle.
    #[error("{0}")]
    Lsp(#[from] LspError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
