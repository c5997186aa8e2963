//! Typed object I/O: one object per frame.
//!
//! The stream is only borrowed. Closing it is up to whoever opened it.

use std::io::{Read, Write};

use pipecall_frame::{FrameConfig, FrameReader, FrameWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::object::ObjectCodec;

/// Serialize `value` with `codec` and write it to `stream` as one frame.
pub fn write_object<S, T, C>(stream: &mut S, codec: &C, value: &T, config: &FrameConfig) -> Result<()>
where
    S: Write,
    T: Serialize + ?Sized,
    C: ObjectCodec,
{
    let payload = codec.encode(value)?;
    codec.log_payload("write", &payload);
    FrameWriter::with_config(stream, config).send(&payload)?;
    Ok(())
}

/// Read one frame from `stream` and deserialize it with `codec`.
pub fn read_object<S, T, C>(stream: &mut S, codec: &C, config: &FrameConfig) -> Result<T>
where
    S: Read,
    T: DeserializeOwned,
    C: ObjectCodec,
{
    let frame = FrameReader::with_config(stream, config.clone()).read_frame()?;
    codec.log_payload("read", &frame.payload);
    codec.decode(&frame.payload)
}

#[cfg(feature = "async")]
pub use self::nonblocking::{read_object_async, write_object_async};

#[cfg(feature = "async")]
mod nonblocking {
    use pipecall_frame::{read_frame_async, write_frame_async, FrameConfig};
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use tokio::io::{AsyncRead, AsyncWrite};

    use crate::error::Result;
    use crate::object::ObjectCodec;

    /// Async counterpart of [`write_object`](super::write_object).
    pub async fn write_object_async<S, T, C>(
        stream: &mut S,
        codec: &C,
        value: &T,
        config: &FrameConfig,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin,
        T: Serialize + ?Sized,
        C: ObjectCodec,
    {
        let payload = codec.encode(value)?;
        codec.log_payload("write", &payload);
        write_frame_async(stream, payload, config).await?;
        Ok(())
    }

    /// Async counterpart of [`read_object`](super::read_object).
    pub async fn read_object_async<S, T, C>(
        stream: &mut S,
        codec: &C,
        config: &FrameConfig,
    ) -> Result<T>
    where
        S: AsyncRead + Unpin,
        T: DeserializeOwned,
        C: ObjectCodec,
    {
        let frame = read_frame_async(stream, config).await?;
        codec.log_payload("read", &frame.payload);
        codec.decode(&frame.payload)
    }
}
