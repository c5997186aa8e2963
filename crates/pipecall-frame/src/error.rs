/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before any byte of the frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection was closed in the middle of a frame.
    #[error("truncated frame ({received} of {expected} bytes received)")]
    Truncated { expected: usize, received: usize },
}

impl FrameError {
    /// True for errors caused by a malformed or incomplete frame rather than I/O.
    pub fn is_framing(&self) -> bool {
        !matches!(self, FrameError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
