//! Async framing on top of `tokio_util::codec`.

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::codec::{decode_frame, encode_frame, truncation_error, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};

/// `tokio_util` codec for length-prefixed frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn from_config(config: &FrameConfig) -> Self {
        Self::with_max_payload(config.max_payload_size)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(truncation_error(src)),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&payload, dst)
    }
}

/// Read exactly one frame from `reader`.
///
/// Meant for one-frame-per-direction exchanges: bytes the peer sends after
/// the frame may be consumed and discarded.
pub async fn read_frame_async<R>(reader: &mut R, config: &FrameConfig) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(reader, FrameCodec::from_config(config));
    match framed.next().await {
        Some(Ok(frame)) => {
            tracing::trace!(length = frame.len(), "read frame");
            Ok(frame)
        }
        Some(Err(err)) => Err(err),
        None => Err(FrameError::ConnectionClosed),
    }
}

/// Write one frame to `writer` and flush it.
pub async fn write_frame_async<W>(writer: &mut W, payload: Bytes, config: &FrameConfig) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let length = payload.len();
    let mut framed = FramedWrite::new(writer, FrameCodec::from_config(config));
    framed.send(payload).await?;
    tracing::trace!(length, "wrote frame");
    Ok(())
}
