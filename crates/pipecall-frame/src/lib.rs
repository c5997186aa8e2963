//! Length-prefixed framing for pipecall.
//!
//! Every message on a pipe is a single frame:
//! - A 4-byte little-endian unsigned payload length
//! - The payload bytes
//!
//! No magic bytes, no channel multiplexing. A request/response exchange is
//! exactly one frame in each direction. Readers never hand back partial
//! payloads: a stream that ends early is reported as [`FrameError::Truncated`].

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_io;

pub use codec::{
    decode_frame, encode_frame, truncation_error, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_io::{read_frame_async, write_frame_async, FrameCodec};
