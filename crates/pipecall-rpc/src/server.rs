use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use pipecall_codec::{read_object_async, JsonCodec, ObjectCodec};
use pipecall_frame::{write_frame_async, FrameConfig};
use pipecall_transport::{CancellationToken, PipeAddress, PipeListener, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn, Dispatch};

use crate::error::{BoxError, HandlerError, InstanceFailure, Result, RpcError};

type Handler<Req, Resp> =
    Arc<dyn Fn(Req) -> std::result::Result<Resp, HandlerError> + Send + Sync>;

/// What a listener instance does when its handler fails or panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the instance. Its error is reported by [`Server::when_all`].
    #[default]
    Terminate,
    /// Close the connection without a response and keep serving.
    LogAndContinue,
}

/// Configures and starts a [`Server`].
pub struct ServerBuilder<C = JsonCodec> {
    pipe_name: String,
    codec: C,
    instances: usize,
    policy: FailurePolicy,
    frame_config: FrameConfig,
    dispatch: Option<Dispatch>,
}

impl ServerBuilder<JsonCodec> {
    /// One listener instance, UTF-8 JSON, [`FailurePolicy::Terminate`].
    pub fn new(pipe_name: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            codec: JsonCodec::default(),
            instances: 1,
            policy: FailurePolicy::default(),
            frame_config: FrameConfig::default(),
            dispatch: None,
        }
    }
}

impl<C: ObjectCodec> ServerBuilder<C> {
    /// Replace the object codec. Clients must use the same one.
    pub fn with_codec<C2: ObjectCodec>(self, codec: C2) -> ServerBuilder<C2> {
        ServerBuilder {
            pipe_name: self.pipe_name,
            codec,
            instances: self.instances,
            policy: self.policy,
            frame_config: self.frame_config,
            dispatch: self.dispatch,
        }
    }

    /// Number of concurrent listener instances. Must be at least 1.
    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame_config = config;
        self
    }

    /// Send every event the server and its instances emit to `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Bind the pipe and spawn every listener instance with an infallible handler.
    pub fn start<Req, Resp, F>(self, handler: F) -> Result<Server>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        self.start_fallible(move |request| Ok::<_, Infallible>(handler(request)))
    }

    /// Bind the pipe and spawn every listener instance.
    ///
    /// An `Err` from `handler` (or a panic inside it) is handled according to
    /// the configured [`FailurePolicy`]. Must be called from within a Tokio
    /// runtime.
    pub fn start_fallible<Req, Resp, E, F>(self, handler: F) -> Result<Server>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        E: Into<BoxError>,
        F: Fn(Req) -> std::result::Result<Resp, E> + Send + Sync + 'static,
    {
        let handler: Handler<Req, Resp> = Arc::new(move |request| {
            handler(request).map_err(|err| HandlerError::Failed(err.into()))
        });

        let dispatch = self.dispatch.clone();
        match &dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || self.spawn(handler)),
            None => self.spawn(handler),
        }
    }

    fn spawn<Req, Resp>(self, handler: Handler<Req, Resp>) -> Result<Server>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| RpcError::NoRuntime)?;
        let _guard = runtime.enter();

        let address = PipeAddress::local(self.pipe_name)?;
        let listener = PipeListener::bind(&address, self.instances)?;

        info!(
            pipe = %address,
            codec = self.codec.name(),
            request = std::any::type_name::<Req>(),
            response = std::any::type_name::<Resp>(),
            instances = self.instances,
            policy = ?self.policy,
            "starting pipe server"
        );

        let shared = Arc::new(Shared {
            listener,
            codec: self.codec,
            handler,
            policy: self.policy,
            frame_config: self.frame_config,
        });

        let instances = (0..self.instances)
            .map(|index| {
                let cancel = CancellationToken::new();
                let serve = run_instance(index, Arc::clone(&shared), cancel.clone());
                let task = match &self.dispatch {
                    Some(dispatch) => runtime.spawn(serve.with_subscriber(dispatch.clone())),
                    None => runtime.spawn(serve),
                };
                ServerInstance { cancel, task }
            })
            .collect();

        Ok(Server {
            address,
            instances,
            dispatch: self.dispatch,
        })
    }
}

impl<C: ObjectCodec> fmt::Debug for ServerBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("pipe_name", &self.pipe_name)
            .field("codec", &self.codec.name())
            .field("instances", &self.instances)
            .field("policy", &self.policy)
            .finish()
    }
}

/// State shared by all listener instances of one server.
struct Shared<Req, Resp, C> {
    listener: PipeListener,
    codec: C,
    handler: Handler<Req, Resp>,
    policy: FailurePolicy,
    frame_config: FrameConfig,
}

struct ServerInstance {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

/// A running pipe server with a fixed set of listener instances.
///
/// Dropping the server cancels every instance that is still running.
pub struct Server {
    address: PipeAddress,
    instances: Vec<ServerInstance>,
    dispatch: Option<Dispatch>,
}

impl Server {
    /// Start a one-instance JSON server on `pipe_name`.
    pub fn start<Req, Resp, F>(pipe_name: impl Into<String>, handler: F) -> Result<Server>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        ServerBuilder::new(pipe_name).start(handler)
    }

    pub fn builder(pipe_name: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(pipe_name)
    }

    pub fn address(&self) -> &PipeAddress {
        &self.address
    }

    /// Number of listener instances the server was started with.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Listener instances whose loop has not finished yet.
    pub fn running_instances(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| !instance.task.is_finished())
            .count()
    }

    /// Cancel every listener instance.
    ///
    /// Instances stop at their next accept wait; an exchange already in
    /// progress completes first. Clients still waiting to be accepted are
    /// never acknowledged, so they keep waiting or time out without having
    /// sent their request.
    pub fn cancel_all(&self) {
        self.scoped(|| info!(pipe = %self.address, "cancelling all listener instances"));
        for instance in &self.instances {
            instance.cancel.cancel();
        }
    }

    /// A handle that cancels every instance from another thread or task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tokens: self
                .instances
                .iter()
                .map(|instance| instance.cancel.clone())
                .collect(),
        }
    }

    /// Wait for every listener instance to finish.
    ///
    /// Returns `RpcError::InstancesFailed` listing every instance that ended
    /// with an error.
    pub async fn when_all(mut self) -> Result<()> {
        let instances = std::mem::take(&mut self.instances);
        let mut failures = Vec::new();

        for (index, instance) in instances.into_iter().enumerate() {
            match instance.task.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => failures.push(InstanceFailure { index, error }),
                Err(join) => failures.push(InstanceFailure {
                    index,
                    error: RpcError::InstanceAborted(join.to_string()),
                }),
            }
        }

        self.scoped(|| {
            info!(
                pipe = %self.address,
                failed = failures.len(),
                "all listener instances stopped"
            )
        });

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RpcError::InstancesFailed(failures))
        }
    }

    fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for instance in &self.instances {
            instance.cancel.cancel();
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("instances", &self.instances.len())
            .field("running", &self.running_instances())
            .finish()
    }
}

/// Cancels every listener instance of a [`Server`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tokens: Arc<[CancellationToken]>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        for token in self.tokens.iter() {
            token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tokens.iter().all(CancellationToken::is_cancelled)
    }
}

async fn run_instance<Req, Resp, C>(
    index: usize,
    shared: Arc<Shared<Req, Resp, C>>,
    cancel: CancellationToken,
) -> Result<()>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    C: ObjectCodec,
{
    let pipe = shared.listener.address().clone();
    info!(pipe = %pipe, index, "listener instance started");

    loop {
        let mut stream = match shared.listener.accept(&cancel).await {
            Ok(stream) => stream,
            Err(TransportError::Cancelled) => {
                info!(pipe = %pipe, index, "listener instance cancelled");
                return Ok(());
            }
            Err(err) => {
                error!(pipe = %pipe, index, error = %err, "accept failed, stopping listener instance");
                return Err(err.into());
            }
        };
        debug!(pipe = %pipe, index, "connected to pipe client");

        let request: Req =
            match read_object_async(&mut stream, &shared.codec, &shared.frame_config).await {
                Ok(request) => request,
                Err(err) => {
                    warn!(pipe = %pipe, index, error = %err, "failed to read request");
                    continue;
                }
            };

        let response = match invoke(&shared.handler, request).await {
            Ok(response) => response,
            Err(err) => match shared.policy {
                FailurePolicy::Terminate => {
                    error!(pipe = %pipe, index, error = %err, "handler failed, stopping listener instance");
                    return Err(err.into());
                }
                FailurePolicy::LogAndContinue => {
                    warn!(pipe = %pipe, index, error = %err, "handler failed, closing connection without response");
                    continue;
                }
            },
        };

        // `Resp` is only `Send`: hold no borrow of it across the write.
        let payload = match shared.codec.encode(&response) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(pipe = %pipe, index, error = %err, "failed to encode response");
                continue;
            }
        };
        shared.codec.log_payload("write", &payload);
        if let Err(err) = write_frame_async(&mut stream, payload, &shared.frame_config).await {
            warn!(pipe = %pipe, index, error = %err, "failed to write response");
            continue;
        }

        info!(pipe = %pipe, index, "end connection");
    }
}

/// Run the handler on the blocking pool, converting a panic into a `HandlerError`.
async fn invoke<Req, Resp>(
    handler: &Handler<Req, Resp>,
    request: Req,
) -> std::result::Result<Resp, HandlerError>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let handler = Arc::clone(handler);
    let dispatch = tracing::dispatcher::get_default(Dispatch::clone);

    let outcome = tokio::task::spawn_blocking(move || {
        tracing::dispatcher::with_default(&dispatch, || handler(request))
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(join) if join.is_panic() => Err(HandlerError::Panicked(panic_message(join.into_panic()))),
        Err(join) => Err(HandlerError::Panicked(join.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;

    fn unique_pipe(tag: &str) -> String {
        format!(
            "server-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .subsec_nanos()
        )
    }

    #[test]
    fn start_outside_runtime_fails() {
        let err = Server::start(unique_pipe("nort"), |s: String| s.len() as u32)
            .expect_err("no runtime should fail");
        assert!(matches!(err, RpcError::NoRuntime));
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[tokio::test]
    async fn zero_instances_rejected() {
        let err = ServerBuilder::new(unique_pipe("zero"))
            .with_instances(0)
            .start(|s: String| s.len() as u32)
            .expect_err("zero instances should fail");
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn all_instances_spawned_eagerly() {
        let server = ServerBuilder::new(unique_pipe("eager"))
            .with_instances(3)
            .start(|s: String| s.len() as u32)
            .expect("server should start");

        assert_eq!(server.instance_count(), 3);
        assert_eq!(server.running_instances(), 3);

        server.cancel_all();
        tokio::time::timeout(Duration::from_secs(5), server.when_all())
            .await
            .expect("instances should drain")
            .expect("cancelled instances should succeed");
    }

    #[tokio::test]
    async fn cancel_handle_stops_instances() {
        let server = ServerBuilder::new(unique_pipe("handle"))
            .with_instances(2)
            .start(|s: String| s)
            .expect("server should start");

        let handle = server.cancel_handle();
        assert!(!handle.is_cancelled());
        std::thread::spawn(move || handle.cancel())
            .join()
            .expect("cancel thread should finish");

        tokio::time::timeout(Duration::from_secs(5), server.when_all())
            .await
            .expect("instances should drain")
            .expect("cancelled instances should succeed");
    }

    #[tokio::test]
    async fn socket_file_removed_after_shutdown() {
        let server = Server::start(unique_pipe("cleanup"), |n: u32| n + 1)
            .expect("server should start");
        let path = server.address().path().to_path_buf();
        assert!(path.exists());

        server.cancel_all();
        server.when_all().await.expect("clean shutdown");
        assert!(!path.exists());
    }

    #[test]
    fn panic_message_extracts_text() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
