//! Typed request/response over local named pipes.
//!
//! A [`Client`] opens one connection per call, writes one request frame,
//! reads one response frame and closes the connection. A [`Server`] binds a
//! pipe name and runs a fixed number of listener instances, each serving one
//! exchange at a time until it is cancelled.
//!
//! ```no_run
//! # async fn demo() -> pipecall_rpc::Result<()> {
//! use pipecall_rpc::{Client, Server};
//!
//! let server = Server::start("sample_pipe", |s: String| s.len() as u32)?;
//!
//! let client: Client<String, u32> = Client::new("sample_pipe");
//! assert_eq!(client.request_async(&"hello".to_string()).await?, 5);
//!
//! server.cancel_all();
//! server.when_all().await
//! # }
//! ```

pub mod client;
pub mod error;

#[cfg(unix)]
pub mod server;

pub use client::Client;
pub use error::{BoxError, ErrorKind, HandlerError, InstanceFailure, Result, RpcError};

#[cfg(unix)]
pub use server::{CancelHandle, FailurePolicy, Server, ServerBuilder};

pub use pipecall_codec::{BinaryCodec, JsonCodec, ObjectCodec, TextEncoding};
pub use pipecall_frame::FrameConfig;
pub use pipecall_transport::{CancellationToken, PipeAddress};

#[cfg(unix)]
pub use pipecall_transport::ConnectOptions;
