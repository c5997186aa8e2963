use std::io::ErrorKind;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::address::PipeAddress;
use crate::error::{Result, TransportError};
use crate::uds::{
    check_accept_ack, is_not_listening, server_went_away, SocketFile, UnixDomainSocket, ACCEPT_ACK,
    CONNECT_POLL_INTERVAL,
};

/// How a client waits for a pipe server.
///
/// With neither a timeout nor a token the wait is indefinite. When both are
/// set, whichever fires first decides the outcome.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl ConnectOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A connected async pipe stream.
///
/// Server-side streams hold their pipe instance until dropped.
#[derive(Debug)]
pub struct AsyncPipeStream {
    inner: UnixStream,
    _slot: Option<InstanceSlot>,
}

impl AsyncPipeStream {
    /// Connect to a pipe, waiting indefinitely for a server.
    pub async fn connect(address: &PipeAddress) -> Result<Self> {
        Self::connect_with(address, &ConnectOptions::default()).await
    }

    /// Connect to a pipe with an optional timeout and cancellation token.
    ///
    /// Both apply until a server instance has acknowledged the connection,
    /// so a client queued behind busy instances still times out.
    pub async fn connect_with(address: &PipeAddress, options: &ConnectOptions) -> Result<Self> {
        let cancelled = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let attempt = connect_loop(address.path());

        let stream = match options.timeout {
            Some(timeout) => tokio::select! {
                biased;
                _ = cancelled => Err(TransportError::Cancelled),
                result = tokio::time::timeout(timeout, attempt) => {
                    result.unwrap_or(Err(TransportError::ConnectTimeout(timeout)))
                }
            },
            None => tokio::select! {
                biased;
                _ = cancelled => Err(TransportError::Cancelled),
                result = attempt => result,
            },
        }?;

        debug!(pipe = %address, "connected to pipe server");
        Ok(Self {
            inner: stream,
            _slot: None,
        })
    }
}

async fn connect_loop(path: &Path) -> Result<UnixStream> {
    let connect_err = |source| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    };

    loop {
        match UnixStream::connect(path).await {
            Ok(mut stream) => match wait_for_accept(&mut stream).await {
                Ok(()) => return Ok(stream),
                Err(err) if server_went_away(&err) => {
                    debug!(?path, "pending connection dropped by server");
                }
                Err(source) => return Err(connect_err(source)),
            },
            Err(err) if is_not_listening(&err) => {}
            Err(source) => return Err(connect_err(source)),
        }
        tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
    }
}

async fn wait_for_accept(stream: &mut UnixStream) -> std::io::Result<()> {
    let ack = stream.read_u8().await?;
    check_accept_ack(ack)
}

impl AsyncRead for AsyncPipeStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for AsyncPipeStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Server side of a pipe shared by up to `max_instances` concurrent instances.
///
/// Every [`accept`](Self::accept) creates one instance; the instance stays
/// allocated until the returned stream is dropped.
#[derive(Debug)]
pub struct PipeListener {
    listener: tokio::net::UnixListener,
    address: PipeAddress,
    max_instances: usize,
    active: Arc<AtomicUsize>,
    _file: SocketFile,
}

impl PipeListener {
    /// Bind the pipe endpoint. Must be called from within a Tokio runtime.
    pub fn bind(address: &PipeAddress, max_instances: usize) -> Result<Self> {
        if max_instances == 0 {
            return Err(TransportError::Bind {
                path: address.path().to_path_buf(),
                source: std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "max_instances must be at least 1",
                ),
            });
        }

        let (raw, file) = UnixDomainSocket::bind(address.path())?.into_parts();
        raw.set_nonblocking(true)?;
        let listener = tokio::net::UnixListener::from_std(raw)?;

        debug!(pipe = %address, max_instances, "pipe endpoint bound");
        Ok(Self {
            listener,
            address: address.clone(),
            max_instances,
            active: Arc::new(AtomicUsize::new(0)),
            _file: file,
        })
    }

    /// Create one pipe instance and wait for a client to connect to it.
    ///
    /// The client is sent [`ACCEPT_ACK`] before the stream is returned;
    /// clients that already gave up are skipped. Fails with
    /// `InstancesExhausted` when all instances are in use and with
    /// `Cancelled` when `cancel` fires before a client is accepted.
    pub async fn accept(&self, cancel: &CancellationToken) -> Result<AsyncPipeStream> {
        let slot = self.reserve()?;
        debug!(pipe = %self.address, "waiting for connection");

        loop {
            let mut stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(pipe = %self.address, "accept cancelled");
                    return Err(TransportError::Cancelled);
                }
                accepted = self.listener.accept() => accepted.map_err(TransportError::Accept)?.0,
            };

            match stream.write_all(&[ACCEPT_ACK]).await {
                Ok(()) => {
                    debug!(pipe = %self.address, "accepted connection");
                    return Ok(AsyncPipeStream {
                        inner: stream,
                        _slot: Some(slot),
                    });
                }
                Err(err) => {
                    debug!(pipe = %self.address, error = %err, "client left before it was accepted");
                }
            }
        }
    }

    fn reserve(&self) -> Result<InstanceSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_instances).then_some(n + 1)
            })
            .map_err(|_| TransportError::InstancesExhausted {
                max: self.max_instances,
            })?;
        Ok(InstanceSlot {
            active: Arc::clone(&self.active),
        })
    }

    pub fn address(&self) -> &PipeAddress {
        &self.address
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    /// Instances currently waiting for or serving a client.
    pub fn active_instances(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// One allocated pipe instance.
#[derive(Debug)]
struct InstanceSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for InstanceSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Instant;

    use super::*;

    fn make_address(tag: &str) -> (PathBuf, PipeAddress) {
        let dir = PathBuf::from(format!(
            "/tmp/pcp-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let path = dir.join("pipe.sock");
        let address = PipeAddress::local(path.to_string_lossy()).expect("address should resolve");
        (dir, address)
    }

    #[tokio::test]
    async fn accept_and_connect_exchange_bytes() {
        let (dir, address) = make_address("exchange");
        let listener = PipeListener::bind(&address, 1).expect("listener should bind");

        let client_address = address.clone();
        let client = tokio::spawn(async move {
            let mut stream = AsyncPipeStream::connect(&client_address)
                .await
                .expect("client should connect");
            stream.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let token = CancellationToken::new();
        let mut server = listener.accept(&token).await.expect("accept should succeed");
        assert_eq!(listener.active_instances(), 1);
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.write_all(b"pong").await.unwrap();

        assert_eq!(&client.await.unwrap(), b"pong");
        drop(server);
        assert_eq!(listener.active_instances(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn accept_cancellation_releases_instance() {
        let (dir, address) = make_address("cancel");
        let listener = PipeListener::bind(&address, 1).expect("listener should bind");

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = listener.accept(&token).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(listener.active_instances(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn instances_are_limited() {
        let (dir, address) = make_address("limit");
        let listener = Arc::new(PipeListener::bind(&address, 1).expect("listener should bind"));

        let token = CancellationToken::new();
        let waiting = {
            let listener = Arc::clone(&listener);
            let token = token.clone();
            tokio::spawn(async move { listener.accept(&token).await.map(|_| ()) })
        };
        while listener.active_instances() == 0 {
            tokio::task::yield_now().await;
        }

        let err = listener.accept(&token).await.unwrap_err();
        assert!(matches!(err, TransportError::InstancesExhausted { max: 1 }));

        token.cancel();
        let first = waiting.await.unwrap();
        assert!(matches!(first, Err(TransportError::Cancelled)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn connect_timeout_while_every_instance_is_busy() {
        let (dir, address) = make_address("busy");
        let listener = PipeListener::bind(&address, 1).expect("listener should bind");

        let first_address = address.clone();
        let first = tokio::spawn(async move { AsyncPipeStream::connect(&first_address).await });
        let token = CancellationToken::new();
        let busy = listener.accept(&token).await.expect("first client accepted");
        first.await.unwrap().expect("first client connected");

        // The only instance is serving; a second client must not get through.
        let timeout = Duration::from_millis(200);
        let options = ConnectOptions::default().with_timeout(timeout);
        let started = Instant::now();
        let err = AsyncPipeStream::connect_with(&address, &options)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, TransportError::ConnectTimeout(t) if t == timeout));
        assert!(elapsed < Duration::from_secs(2), "waited too long: {elapsed:?}");

        drop(busy);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn accept_skips_client_that_gave_up() {
        let (dir, address) = make_address("gave-up");
        let listener = PipeListener::bind(&address, 1).expect("listener should bind");

        let options = ConnectOptions::default().with_timeout(Duration::from_millis(50));
        let err = AsyncPipeStream::connect_with(&address, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectTimeout(_)));

        let client_address = address.clone();
        let client = tokio::spawn(async move {
            let mut stream = AsyncPipeStream::connect(&client_address)
                .await
                .expect("second client should connect");
            stream.write_all(b"live").await.unwrap();
        });

        let token = CancellationToken::new();
        let mut server = listener.accept(&token).await.expect("accept should succeed");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"live");

        client.await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn queued_client_keeps_waiting_when_listener_goes_away() {
        let (dir, address) = make_address("queued");
        let listener = PipeListener::bind(&address, 1).expect("listener should bind");

        let client_address = address.clone();
        let client = tokio::spawn(async move {
            let options = ConnectOptions::default().with_timeout(Duration::from_millis(300));
            AsyncPipeStream::connect_with(&client_address, &options).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(listener);

        let err = client.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::ConnectTimeout(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn zero_instances_rejected() {
        let (dir, address) = make_address("zero");
        let err = PipeListener::bind(&address, 0).unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn connect_timeout_against_missing_pipe() {
        let (dir, address) = make_address("timeout");
        let timeout = Duration::from_millis(200);
        let options = ConnectOptions::default().with_timeout(timeout);

        let started = Instant::now();
        let err = AsyncPipeStream::connect_with(&address, &options)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, TransportError::ConnectTimeout(t) if t == timeout));
        assert!(elapsed >= timeout, "gave up too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "waited too long: {elapsed:?}");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn connect_cancellation_wins_over_long_timeout() {
        let (dir, address) = make_address("connect-cancel");
        let token = CancellationToken::new();
        let options = ConnectOptions::default()
            .with_timeout(Duration::from_secs(30))
            .with_cancel(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = AsyncPipeStream::connect_with(&address, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn timeout_wins_over_idle_token() {
        let (dir, address) = make_address("timeout-first");
        let options = ConnectOptions::default()
            .with_timeout(Duration::from_millis(100))
            .with_cancel(CancellationToken::new());

        let err = AsyncPipeStream::connect_with(&address, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectTimeout(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
