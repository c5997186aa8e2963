use pipecall_frame::FrameError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while reading or writing typed objects.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The underlying frame could not be read or written.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The value could not be turned into a payload.
    #[error("{format} serialization failed: {source}")]
    Serialize {
        format: &'static str,
        #[source]
        source: BoxError,
    },

    /// The payload could not be turned back into the requested type.
    #[error("{format} deserialization failed: {source}")]
    Deserialize {
        format: &'static str,
        #[source]
        source: BoxError,
    },
}

impl CodecError {
    pub(crate) fn serialize(format: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Serialize {
            format,
            source: source.into(),
        }
    }

    pub(crate) fn deserialize(format: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Deserialize {
            format,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
