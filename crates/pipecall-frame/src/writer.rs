use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Writes one frame at a time to a blocking `Write` stream.
///
/// A write timeout on the stream surfaces as `FrameError::Io` with
/// `WouldBlock` or `TimedOut`; only `Interrupted` is retried.
pub struct FrameWriter<T> {
    inner: T,
    max_payload_size: usize,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, &FrameConfig::default())
    }

    pub fn with_config(inner: T, config: &FrameConfig) -> Self {
        Self {
            inner,
            max_payload_size: config.max_payload_size,
        }
    }

    /// Send `payload` as a single frame and flush the stream.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        let mut wire = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        encode_frame(payload, &mut wire)?;
        write_fully(&mut self.inner, &wire)?;
        retry_interrupted(|| self.inner.flush())?;

        tracing::trace!(length = payload.len(), "wrote frame");
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn write_fully<W: Write>(dst: &mut W, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        match retry_interrupted(|| dst.write(bytes))? {
            0 => return Err(FrameError::ConnectionClosed),
            n => bytes = &bytes[n..],
        }
    }
    Ok(())
}

fn retry_interrupted<R>(mut op: impl FnMut() -> std::io::Result<R>) -> Result<R> {
    loop {
        match op() {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            other => return other.map_err(FrameError::Io),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::decode_frame;

    #[test]
    fn writes_length_then_payload() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"hello").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(&wire[..HEADER_SIZE], &5u32.to_le_bytes());
        assert_eq!(&wire[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn consecutive_sends_stay_separate() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"one").unwrap();
        writer.send(b"").unwrap();

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        let first = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let second = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"one");
        assert!(second.is_empty());
        assert!(wire.is_empty());
    }

    #[test]
    fn rejects_payload_over_local_limit() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), &cfg);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn flushes_after_each_frame() {
        let sink = FlushTracker::default();
        let flushed = Arc::clone(&sink.flushed);
        FrameWriter::new(sink).send(b"x").unwrap();
        assert!(flushed.load(Ordering::SeqCst));
    }

    #[test]
    fn interrupted_write_is_retried() {
        let sink = ChunkedWriter {
            pending_error: Some(ErrorKind::Interrupted),
            data: Vec::new(),
        };
        let mut writer = FrameWriter::new(sink);
        writer.send(b"retry").unwrap();
        assert_eq!(writer.into_inner().data.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn write_timeout_surfaces_as_io_error() {
        let sink = ChunkedWriter {
            pending_error: Some(ErrorKind::WouldBlock),
            data: Vec::new(),
        };
        let err = FrameWriter::new(sink).send(b"late").unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn zero_length_write_means_closed() {
        let err = FrameWriter::new(ZeroWriter).send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTracker {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTracker {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Accepts at most two bytes per call, after failing once.
    struct ChunkedWriter {
        pending_error: Option<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for ChunkedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.pending_error.take() {
                return Err(kind.into());
            }
            let n = buf.len().min(2);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
