use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur in pipe transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The pipe name cannot be mapped to a local endpoint.
    #[error("invalid pipe name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Only the local machine can be addressed.
    #[error("remote pipe servers are not supported (server name {0:?})")]
    RemoteServer(String),

    /// Failed to bind the pipe endpoint.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the pipe endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No server accepted the connection within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A connect or accept wait was cancelled through its token.
    #[error("operation cancelled")]
    Cancelled,

    /// Every server instance of the pipe is already in use.
    #[error("all {max} pipe instances are busy")]
    InstancesExhausted { max: usize },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The platform has no pipe transport.
    #[error("pipe transport is not available on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, TransportError>;
