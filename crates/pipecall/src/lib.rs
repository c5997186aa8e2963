//! Typed request/response RPC over local named pipes.
//!
//! A client connects to a named pipe, writes one length-prefixed request,
//! reads one length-prefixed response and disconnects. A server runs a fixed
//! set of listener instances on the same pipe name until they are cancelled.
//!
//! # Crate Structure
//!
//! - [`transport`]: pipe addressing, listener instances, cancellable connect/accept
//! - [`frame`]: `[u32 LE length][payload]` framing
//! - [`codec`]: pluggable object codecs (`bincode`, JSON in UTF-8/UTF-16)
//! - [`rpc`]: `Client`, `Server`, `ServerBuilder` (behind `rpc` feature, on by default)

/// Re-export transport types.
pub mod transport {
    pub use pipecall_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pipecall_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use pipecall_codec::*;
}

/// Re-export client and server types (requires `rpc` feature).
#[cfg(feature = "rpc")]
pub mod rpc {
    pub use pipecall_rpc::*;
}

#[cfg(feature = "rpc")]
pub use pipecall_rpc::{Client, ErrorKind, RpcError};

#[cfg(all(unix, feature = "rpc"))]
pub use pipecall_rpc::{FailurePolicy, Server, ServerBuilder};
