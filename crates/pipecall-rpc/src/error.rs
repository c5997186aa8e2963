use std::fmt;
use std::time::Duration;

use pipecall_codec::CodecError;
use pipecall_frame::FrameError;
use pipecall_transport::TransportError;

/// Boxed error returned by fallible handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure raised by a request handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Failed(#[source] BoxError),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// One listener instance that ended with an error.
#[derive(Debug)]
pub struct InstanceFailure {
    /// Position of the instance in the server's instance set.
    pub index: usize,
    pub error: RpcError,
}

impl fmt::Display for InstanceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {}: {}", self.index, self.error)
    }
}

/// Errors that can occur in client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No server instance accepted the connection within the timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A connect or accept wait was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Framing or (de)serialization error for one exchange.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The request handler failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The server was started outside a Tokio runtime.
    #[error("no Tokio runtime available to run server instances")]
    NoRuntime,

    /// A listener task was aborted or panicked outside the handler.
    #[error("listener instance aborted: {0}")]
    InstanceAborted(String),

    /// One or more listener instances ended with an error.
    #[error("{} listener instance(s) failed: {}", .0.len(), join_failures(.0))]
    InstancesFailed(Vec<InstanceFailure>),
}

fn join_failures(failures: &[InstanceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectTimeout(timeout) => RpcError::ConnectTimeout(timeout),
            TransportError::Cancelled => RpcError::Cancelled,
            other => RpcError::Transport(other),
        }
    }
}

impl From<FrameError> for RpcError {
    fn from(err: FrameError) -> Self {
        RpcError::Codec(CodecError::Frame(err))
    }
}

/// Coarse classification of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectTimeout,
    Cancelled,
    /// Truncated or oversized frame, or the peer closed the connection.
    Framing,
    Deserialization,
    Serialization,
    HandlerFailure,
    /// Any other transport or I/O failure.
    Transport,
    /// Runtime availability and instance supervision failures.
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Framing => "framing",
            ErrorKind::Deserialization => "deserialization",
            ErrorKind::Serialization => "serialization",
            ErrorKind::HandlerFailure => "handler_failure",
            ErrorKind::Transport => "transport",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RpcError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::ConnectTimeout(_) => ErrorKind::ConnectTimeout,
            RpcError::Cancelled => ErrorKind::Cancelled,
            RpcError::Transport(_) => ErrorKind::Transport,
            RpcError::Codec(CodecError::Frame(FrameError::Io(_))) => ErrorKind::Transport,
            RpcError::Codec(CodecError::Frame(_)) => ErrorKind::Framing,
            RpcError::Codec(CodecError::Serialize { .. }) => ErrorKind::Serialization,
            RpcError::Codec(CodecError::Deserialize { .. }) => ErrorKind::Deserialization,
            RpcError::Handler(_) => ErrorKind::HandlerFailure,
            RpcError::NoRuntime | RpcError::InstanceAborted(_) | RpcError::InstancesFailed(_) => {
                ErrorKind::Runtime
            }
        }
    }

    /// Failed instances, if this is an aggregated server error.
    pub fn failures(&self) -> &[InstanceFailure] {
        match self {
            RpcError::InstancesFailed(failures) => failures,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_timeout_and_cancel_are_lifted() {
        let timeout = RpcError::from(TransportError::ConnectTimeout(Duration::from_millis(5)));
        assert!(matches!(timeout, RpcError::ConnectTimeout(_)));
        assert_eq!(timeout.kind(), ErrorKind::ConnectTimeout);

        let cancelled = RpcError::from(TransportError::Cancelled);
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);

        let remote = RpcError::from(TransportError::RemoteServer("box".into()));
        assert_eq!(remote.kind(), ErrorKind::Transport);
    }

    #[test]
    fn frame_errors_split_into_framing_and_transport() {
        let closed = RpcError::from(FrameError::ConnectionClosed);
        assert_eq!(closed.kind(), ErrorKind::Framing);

        let truncated = RpcError::from(FrameError::Truncated {
            expected: 9,
            received: 4,
        });
        assert_eq!(truncated.kind(), ErrorKind::Framing);

        let io = RpcError::from(FrameError::Io(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert_eq!(io.kind(), ErrorKind::Transport);
    }

    #[test]
    fn aggregated_failures_render_each_instance() {
        let err = RpcError::InstancesFailed(vec![
            InstanceFailure {
                index: 0,
                error: RpcError::Handler(HandlerError::Panicked("boom".into())),
            },
            InstanceFailure {
                index: 2,
                error: RpcError::InstanceAborted("task cancelled".into()),
            },
        ]);

        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(err.failures().len(), 2);
        let text = err.to_string();
        assert!(text.starts_with("2 listener instance(s) failed"));
        assert!(text.contains("instance 0: handler panicked: boom"));
        assert!(text.contains("instance 2"));
    }
}
