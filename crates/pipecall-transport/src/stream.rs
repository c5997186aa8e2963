use std::io::{Read, Write};
use std::time::Duration;

use crate::address::PipeAddress;
use crate::error::Result;

/// A connected blocking pipe stream implementing `Read` and `Write`.
///
/// One `PipeStream` carries exactly one exchange. Dropping it closes the
/// connection.
pub struct PipeStream {
    inner: PipeStreamInner,
}

enum PipeStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl PipeStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: PipeStreamInner::Unix(stream),
        }
    }

    /// Connect to a pipe, waiting indefinitely for a server to appear.
    pub fn connect(address: &PipeAddress) -> Result<Self> {
        Self::connect_inner(address, None)
    }

    /// Connect to a pipe, giving up with `ConnectTimeout` after `timeout`.
    pub fn connect_timeout(address: &PipeAddress, timeout: Duration) -> Result<Self> {
        Self::connect_inner(address, Some(timeout))
    }

    #[cfg(unix)]
    fn connect_inner(address: &PipeAddress, timeout: Option<Duration>) -> Result<Self> {
        crate::uds::UnixDomainSocket::connect_waiting(address.path(), timeout)
    }

    #[cfg(not(unix))]
    fn connect_inner(_address: &PipeAddress, _timeout: Option<Duration>) -> Result<Self> {
        Err(crate::error::TransportError::Unsupported)
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }
}

impl std::fmt::Debug for PipeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(_) => f.debug_struct("PipeStream").field("type", &"unix").finish(),
        }
    }
}
