use std::io::{ErrorKind, Read};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::address::MAX_PATH_LEN;
use crate::error::{Result, TransportError};
use crate::stream::PipeStream;

/// How often a waiting client retries while no server endpoint exists.
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Byte a server instance sends once it has taken a connection.
///
/// Until it arrives the client is still connecting: its timeout and
/// cancellation apply and no request has been written.
pub const ACCEPT_ACK: u8 = 0x06;

/// Unix domain socket backing a pipe endpoint.
///
/// Binds filesystem-path sockets on Linux and macOS. The socket file is
/// removed on drop.
pub struct UnixDomainSocket {
    listener: UnixListener,
    file: SocketFile,
}

/// Ownership of a bound socket file; removes it on drop if it is still ours.
#[derive(Debug)]
pub struct SocketFile {
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If a socket file already exists at `path` and nobody is listening on
    /// it, it is removed first (stale socket cleanup). A live socket is left
    /// alone and the bind fails with `AddrInUse`.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on a filesystem-path Unix domain socket with explicit mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        // Remove stale socket if it exists, but never remove non-socket files
        // or sockets someone is still listening on.
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            if UnixStream::connect(&path).is_ok() {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AddrInUse,
                    "another server is listening on this pipe",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created_metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
        let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            file: SocketFile {
                path,
                created_inode,
            },
        })
    }

    /// Connect, waiting until a server instance accepts the connection.
    ///
    /// A connection only counts once the server has sent [`ACCEPT_ACK`]. While
    /// the endpoint is missing, refuses connections, or drops the pending
    /// connection, the wait continues. `None` waits indefinitely;
    /// `Some(timeout)` fails with `ConnectTimeout` once the deadline passes.
    pub fn connect_waiting(path: impl AsRef<Path>, timeout: Option<Duration>) -> Result<PipeStream> {
        let path = path.as_ref();
        let deadline = timeout.map(|t| Instant::now() + t);
        let connect_err = |source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        };

        loop {
            match UnixStream::connect(path) {
                Ok(stream) => match wait_for_accept(&stream, deadline) {
                    Ok(()) => {
                        stream.set_read_timeout(None).map_err(connect_err)?;
                        debug!(?path, "connected to pipe server");
                        return Ok(PipeStream::from_unix(stream));
                    }
                    Err(err) if server_went_away(&err) => {
                        debug!(?path, "pending connection dropped by server");
                    }
                    Err(err) if is_timeout(&err) => {
                        return Err(TransportError::ConnectTimeout(timeout.unwrap_or_default()));
                    }
                    Err(source) => return Err(connect_err(source)),
                },
                Err(err) if is_not_listening(&err) => {}
                Err(source) => return Err(connect_err(source)),
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TransportError::ConnectTimeout(timeout.unwrap_or_default()));
                    }
                    CONNECT_POLL_INTERVAL.min(deadline - now)
                }
                None => CONNECT_POLL_INTERVAL,
            };
            std::thread::sleep(pause);
        }
    }

    /// Split into the raw listener and the socket file guard.
    pub fn into_parts(self) -> (UnixListener, SocketFile) {
        (self.listener, self.file)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl SocketFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "cleaning up socket file");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(
                        path = ?self.path,
                        "socket path identity changed; skipping cleanup"
                    );
                }
            }
        }
    }
}

/// Block until the acknowledgement arrives or `deadline` passes.
fn wait_for_accept(mut stream: &UnixStream, deadline: Option<Instant>) -> std::io::Result<()> {
    let remaining = match deadline {
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(ErrorKind::TimedOut.into());
            }
            Some(left)
        }
        None => None,
    };
    stream.set_read_timeout(remaining)?;

    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack)?;
    check_accept_ack(ack[0])
}

pub(crate) fn check_accept_ack(byte: u8) -> std::io::Result<()> {
    if byte == ACCEPT_ACK {
        Ok(())
    } else {
        Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("unexpected accept acknowledgement {byte:#04x}"),
        ))
    }
}

/// The server closed a connection it had not accepted yet.
pub(crate) fn server_went_away(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// The endpoint is missing or nobody is listening on it yet.
pub(crate) fn is_not_listening(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::ConnectionRefused
    )
}
