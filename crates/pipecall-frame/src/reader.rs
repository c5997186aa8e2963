use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, truncation_error, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally, so callers always get complete frames.
/// Bytes after the current frame are left unread in the stream.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached before
    /// the frame starts and `Err(FrameError::Truncated)` when it is reached
    /// in the middle of one.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                tracing::trace!(length = frame.len(), "read frame");
                return Ok(frame);
            }

            // Never read past the end of the current frame.
            let wanted = remaining_for_frame(&self.buf).min(READ_CHUNK_SIZE);
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk[..wanted]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(truncation_error(&self.buf));
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

fn remaining_for_frame(buf: &BytesMut) -> usize {
    if buf.len() < HEADER_SIZE {
        return HEADER_SIZE - buf.len();
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&buf[..HEADER_SIZE]);
    let total = HEADER_SIZE + u32::from_le_bytes(header) as usize;
    total.saturating_sub(buf.len()).max(1)
}
