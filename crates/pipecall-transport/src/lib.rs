//! Local named-pipe transport.
//!
//! A pipe is addressed by `(server name, pipe name)` and only the local
//! machine is reachable. On Unix a pipe is a Unix domain socket whose path is
//! derived from the pipe name.
//!
//! This is the lowest layer of pipecall. Blocking clients use [`PipeStream`];
//! with the `async` feature, servers use [`PipeListener`] (shared endpoint with
//! a fixed number of instances) and async clients use [`AsyncPipeStream`].

pub mod address;
pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod uds;

#[cfg(all(unix, feature = "async"))]
pub mod pipe;

pub use address::{PipeAddress, LOCAL_SERVER};
pub use error::{Result, TransportError};
pub use stream::PipeStream;

#[cfg(unix)]
pub use uds::{UnixDomainSocket, CONNECT_POLL_INTERVAL};

#[cfg(all(unix, feature = "async"))]
pub use pipe::{AsyncPipeStream, ConnectOptions, PipeListener};

#[cfg(feature = "async")]
pub use tokio_util::sync::CancellationToken;
