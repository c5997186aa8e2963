use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};

/// Server name that denotes the local machine.
pub const LOCAL_SERVER: &str = ".";

/// Prefix of the socket file a pipe name resolves to.
pub const SOCKET_PREFIX: &str = "pipecall-";

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
pub(crate) const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
pub(crate) const MAX_PATH_LEN: usize = 104;

/// Address of a pipe: `(server name, pipe name)`.
///
/// Only the local machine is reachable, so the server name must be `"."` or
/// `"localhost"`. A plain pipe name resolves to
/// `<temp_dir>/pipecall-<name>.sock`; an absolute path is used as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeAddress {
    server_name: String,
    pipe_name: String,
    path: PathBuf,
}

impl PipeAddress {
    /// Address a pipe on the local machine.
    pub fn local(pipe_name: impl Into<String>) -> Result<Self> {
        Self::new(LOCAL_SERVER, pipe_name)
    }

    /// Address a pipe on an explicit server.
    pub fn new(server_name: impl Into<String>, pipe_name: impl Into<String>) -> Result<Self> {
        let server_name = server_name.into();
        if !is_local(&server_name) {
            return Err(TransportError::RemoteServer(server_name));
        }

        let pipe_name = pipe_name.into();
        let path = resolve_path(&pipe_name)?;

        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        Ok(Self {
            server_name,
            pipe_name,
            path,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    /// Filesystem path of the socket backing this pipe.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for PipeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r"\\{}\pipe\{}", self.server_name, self.pipe_name)
    }
}

fn is_local(server_name: &str) -> bool {
    server_name == LOCAL_SERVER || server_name.eq_ignore_ascii_case("localhost")
}

fn resolve_path(pipe_name: &str) -> Result<PathBuf> {
    let invalid = |reason| TransportError::InvalidName {
        name: pipe_name.to_string(),
        reason,
    };

    if pipe_name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if pipe_name.contains('\0') {
        return Err(invalid("name contains a NUL byte"));
    }

    let as_path = Path::new(pipe_name);
    if as_path.is_absolute() {
        return Ok(as_path.to_path_buf());
    }
    if pipe_name.contains('/') {
        return Err(invalid("relative names must not contain '/'"));
    }

    Ok(std::env::temp_dir().join(format!("{SOCKET_PREFIX}{pipe_name}.sock")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_resolves_into_temp_dir() {
        let address = PipeAddress::local("sample_pipe").unwrap();
        assert_eq!(address.server_name(), ".");
        assert_eq!(address.pipe_name(), "sample_pipe");
        assert_eq!(
            address.path(),
            std::env::temp_dir().join("pipecall-sample_pipe.sock")
        );
    }

    #[test]
    fn absolute_name_is_used_verbatim() {
        let address = PipeAddress::local("/tmp/custom.sock").unwrap();
        assert_eq!(address.path(), Path::new("/tmp/custom.sock"));
    }

    #[test]
    fn localhost_is_accepted() {
        assert!(PipeAddress::new("localhost", "p").is_ok());
        assert!(PipeAddress::new("LocalHost", "p").is_ok());
    }

    #[test]
    fn remote_server_is_rejected() {
        let err = PipeAddress::new("build-box", "p").unwrap_err();
        assert!(matches!(err, TransportError::RemoteServer(name) if name == "build-box"));
    }

    #[test]
    fn invalid_names_are_rejected() {
        for name in ["", "a/b", "nul\0byte"] {
            let err = PipeAddress::local(name).unwrap_err();
            assert!(
                matches!(err, TransportError::InvalidName { .. }),
                "{name:?} should be invalid"
            );
        }
    }

    #[test]
    fn overlong_name_is_rejected() {
        let err = PipeAddress::local("a".repeat(200)).unwrap_err();
        assert!(matches!(err, TransportError::PathTooLong { .. }));
    }

    #[test]
    fn display_uses_pipe_notation() {
        let address = PipeAddress::local("svc").unwrap();
        assert_eq!(address.to_string(), r"\\.\pipe\svc");
    }
}
