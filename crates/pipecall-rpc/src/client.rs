use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use pipecall_codec::{read_object, write_object, JsonCodec, ObjectCodec};
use pipecall_frame::FrameConfig;
use pipecall_transport::{PipeAddress, PipeStream, LOCAL_SERVER};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, Dispatch};

#[cfg(unix)]
use pipecall_codec::{read_object_async, write_object_async};
#[cfg(unix)]
use pipecall_transport::{AsyncPipeStream, CancellationToken, ConnectOptions};
#[cfg(unix)]
use tracing::instrument::WithSubscriber;

use crate::error::Result;

/// Sends one typed request per connection to a named pipe server.
///
/// Every call opens its own connection, performs exactly one exchange and
/// closes the connection before returning, so a client can be shared freely
/// between threads and tasks.
pub struct Client<Req, Resp, C = JsonCodec> {
    server_name: String,
    pipe_name: String,
    codec: C,
    frame_config: FrameConfig,
    dispatch: Option<Dispatch>,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Client<Req, Resp, JsonCodec> {
    /// Client for a pipe on the local machine, using UTF-8 JSON.
    pub fn new(pipe_name: impl Into<String>) -> Self {
        Self {
            server_name: LOCAL_SERVER.to_string(),
            pipe_name: pipe_name.into(),
            codec: JsonCodec::default(),
            frame_config: FrameConfig::default(),
            dispatch: None,
            _types: PhantomData,
        }
    }
}

impl<Req, Resp, C> Client<Req, Resp, C>
where
    Req: Serialize,
    Resp: DeserializeOwned,
    C: ObjectCodec,
{
    /// Target a different server name. Only `"."` and `"localhost"` resolve.
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Replace the object codec. The server must use the same one.
    pub fn with_codec<C2: ObjectCodec>(self, codec: C2) -> Client<Req, Resp, C2> {
        Client {
            server_name: self.server_name,
            pipe_name: self.pipe_name,
            codec,
            frame_config: self.frame_config,
            dispatch: self.dispatch,
            _types: PhantomData,
        }
    }

    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame_config = config;
        self
    }

    /// Send every event this client emits to `dispatch` instead of the
    /// ambient default subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Resolve the configured server and pipe name.
    pub fn address(&self) -> Result<PipeAddress> {
        Ok(PipeAddress::new(
            self.server_name.as_str(),
            self.pipe_name.as_str(),
        )?)
    }

    /// Send `request` and wait for the response, blocking the calling thread.
    ///
    /// Waits indefinitely for a server instance to become available.
    pub fn request(&self, request: &Req) -> Result<Resp> {
        self.scoped(|| self.exchange_blocking(request, None))
    }

    /// Like [`request`](Self::request), but gives up with
    /// `RpcError::ConnectTimeout` if no server accepts within `timeout`.
    ///
    /// The timeout covers connecting only, not the exchange itself.
    pub fn request_timeout(&self, request: &Req, timeout: Duration) -> Result<Resp> {
        self.scoped(|| self.exchange_blocking(request, Some(timeout)))
    }

    fn exchange_blocking(&self, request: &Req, timeout: Option<Duration>) -> Result<Resp> {
        let address = self.address()?;
        info!(pipe = %address, ?timeout, "connecting to pipe server");

        let mut stream = match timeout {
            Some(timeout) => PipeStream::connect_timeout(&address, timeout)?,
            None => PipeStream::connect(&address)?,
        };
        debug!(pipe = %address, "connected to pipe server");

        stream.set_read_timeout(self.frame_config.read_timeout)?;
        stream.set_write_timeout(self.frame_config.write_timeout)?;

        write_object(&mut stream, &self.codec, request, &self.frame_config)?;
        let response = read_object(&mut stream, &self.codec, &self.frame_config)?;

        info!(pipe = %address, "exchange complete");
        Ok(response)
    }

    fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

#[cfg(unix)]
impl<Req, Resp, C> Client<Req, Resp, C>
where
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
    C: ObjectCodec,
{
    /// Send `request` without blocking, waiting indefinitely for a server.
    pub async fn request_async(&self, request: &Req) -> Result<Resp> {
        self.request_async_with(request, ConnectOptions::default())
            .await
    }

    /// Async request with a connect timeout.
    pub async fn request_async_timeout(&self, request: &Req, timeout: Duration) -> Result<Resp> {
        self.request_async_with(request, ConnectOptions::default().with_timeout(timeout))
            .await
    }

    /// Async request whose connect wait ends with `RpcError::Cancelled` when
    /// `cancel` fires.
    pub async fn request_async_cancellable(
        &self,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Resp> {
        self.request_async_with(request, ConnectOptions::default().with_cancel(cancel.clone()))
            .await
    }

    /// Async request with explicit connect options.
    ///
    /// With both a timeout and a token, whichever fires first decides the
    /// error. Neither interrupts an exchange that has already connected.
    pub async fn request_async_with(&self, request: &Req, options: ConnectOptions) -> Result<Resp> {
        let exchange = self.exchange_async(request, options);
        match &self.dispatch {
            Some(dispatch) => exchange.with_subscriber(dispatch.clone()).await,
            None => exchange.await,
        }
    }

    async fn exchange_async(&self, request: &Req, options: ConnectOptions) -> Result<Resp> {
        let address = self.address()?;
        info!(
            pipe = %address,
            timeout = ?options.timeout,
            cancellable = options.cancel.is_some(),
            "connecting to pipe server"
        );

        let mut stream = AsyncPipeStream::connect_with(&address, &options).await?;

        write_object_async(&mut stream, &self.codec, request, &self.frame_config).await?;
        let response = read_object_async(&mut stream, &self.codec, &self.frame_config).await?;

        info!(pipe = %address, "exchange complete");
        Ok(response)
    }
}

impl<Req, Resp, C: Clone> Clone for Client<Req, Resp, C> {
    fn clone(&self) -> Self {
        Self {
            server_name: self.server_name.clone(),
            pipe_name: self.pipe_name.clone(),
            codec: self.codec.clone(),
            frame_config: self.frame_config.clone(),
            dispatch: self.dispatch.clone(),
            _types: PhantomData,
        }
    }
}

impl<Req, Resp, C: ObjectCodec> fmt::Debug for Client<Req, Resp, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("server_name", &self.server_name)
            .field("pipe_name", &self.pipe_name)
            .field("codec", &self.codec.name())
            .field("request", &std::any::type_name::<Req>())
            .field("response", &std::any::type_name::<Resp>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use pipecall_codec::BinaryCodec;

    use super::*;
    use crate::error::{ErrorKind, RpcError};

    fn unique_pipe(tag: &str) -> String {
        format!(
            "client-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .subsec_nanos()
        )
    }

    #[test]
    fn remote_server_is_rejected_before_connecting() {
        let client: Client<String, u32> = Client::new("anything").with_server_name("build-box");
        let err = client
            .request(&"hi".to_string())
            .expect_err("remote server should fail");
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn localhost_resolves_like_dot() {
        let dot: Client<String, u32> = Client::new("same");
        let host: Client<String, u32> = Client::new("same").with_server_name("LocalHost");
        assert_eq!(
            dot.address().expect("dot should resolve").path(),
            host.address().expect("localhost should resolve").path()
        );
    }

    #[test]
    fn blocking_timeout_against_missing_pipe() {
        let client: Client<String, u32, BinaryCodec> =
            Client::new(unique_pipe("missing")).with_codec(BinaryCodec);

        let started = Instant::now();
        let err = client
            .request_timeout(&"x".to_string(), Duration::from_millis(150))
            .expect_err("no server should time out");
        let elapsed = started.elapsed();

        assert!(matches!(err, RpcError::ConnectTimeout(_)));
        assert!(elapsed >= Duration::from_millis(140), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    }

    #[tokio::test]
    async fn async_cancel_ends_connect_wait() {
        let client: Client<String, u32> = Client::new(unique_pipe("cancel"));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = client
            .request_async_cancellable(&"x".to_string(), &token)
            .await
            .expect_err("cancelled wait should fail");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn async_timeout_wins_over_late_cancel() {
        let client: Client<String, u32> = Client::new(unique_pipe("both"));
        let token = CancellationToken::new();
        let options = ConnectOptions::default()
            .with_timeout(Duration::from_millis(60))
            .with_cancel(token.clone());

        let err = client
            .request_async_with(&"x".to_string(), options)
            .await
            .expect_err("timeout should fire first");
        assert_eq!(err.kind(), ErrorKind::ConnectTimeout);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn debug_names_codec_and_types() {
        let client: Client<String, u32> = Client::new("dbg");
        let text = format!("{client:?}");
        assert!(text.contains("json"));
        assert!(text.contains("String"));
        assert!(text.contains("u32"));
    }
}
