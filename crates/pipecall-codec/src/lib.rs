//! Typed object encoding for pipecall.
//!
//! An [`ObjectCodec`] turns a `serde` value into the payload of one frame.
//! Two codecs ship with the crate:
//!
//! - [`BinaryCodec`]: compact `bincode` bytes
//! - [`JsonCodec`]: compact JSON text in UTF-8 or UTF-16 ([`TextEncoding`])
//!
//! [`write_object`] and [`read_object`] move one value over any blocking
//! stream; `write_object_async` / `read_object_async` (feature `async`) do the
//! same over tokio streams. Both sides of a pipe must agree on the codec.

pub mod error;
pub mod io;
pub mod object;

pub use error::{CodecError, Result};
pub use io::{read_object, write_object};
pub use object::{BinaryCodec, JsonCodec, ObjectCodec, TextEncoding};

#[cfg(feature = "async")]
pub use io::{read_object_async, write_object_async};
