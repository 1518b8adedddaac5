//! The public surface: `Client`/`Server`/`Publisher`/`Subscriber`, the
//! typed `Writer<T>`/`Reader<T>` sugar, and `MessageHandler` dispatch.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rpc_envelope::Envelope;
use rpc_transport::{ConnectionFactory, NetworkConfig, TransportError};
use tokio::sync::Mutex as AsyncMutex;

use crate::incoming::IncomingCall;
use crate::outgoing::OutgoingCall;
use crate::publisher::PublisherClientHandler;
use crate::rpc::FinishStatus;
use crate::server::{ClientHandler, ServerCore};
use crate::sink::{Drained, Sink};

/// A type an application can send/receive over a call, tagged with its own
/// `type_url`. `TypedMessage` is the seam an application fills in with its own
/// (de)serialization on top of protobuf's self-describing *Any* envelope shape.
pub trait TypedMessage: Sized + Send + 'static {
    const TYPE_URL: &'static str;

    fn encode(&self) -> Bytes;
    fn decode(bytes: Bytes) -> Result<Self, DecodeError>;
}

#[derive(Debug, thiserror::Error)]
#[error("failed to decode message body for `{type_url}`")]
pub struct DecodeError {
    pub type_url: &'static str,
}

/// One side of a call: dialed by us (`Outgoing`) or handed to us by a `ServerCore`
/// (`Incoming`). `Client` is the single user-facing type for both.
#[derive(Clone)]
enum CallSide {
    Outgoing(Arc<AsyncMutex<OutgoingCall>>),
    Incoming(Arc<IncomingCall>),
}

/// `Client`: `start()`, `stop()`, `isRunning()`, plus the typed
/// `writer<T>()`/`reader<T>()` sugar.
#[derive(Clone)]
pub struct Client {
    side: CallSide,
}

impl Client {
    /// A client this process will dial out with.
    pub fn new(factory: Arc<dyn ConnectionFactory>, cfg: NetworkConfig) -> Self {
        Self {
            side: CallSide::Outgoing(Arc::new(AsyncMutex::new(OutgoingCall::new(factory, cfg)))),
        }
    }

    pub(crate) fn from_incoming(call: Arc<IncomingCall>) -> Self {
        Self {
            side: CallSide::Incoming(call),
        }
    }

    /// `start() -> bool`. A no-op returning `false` for a server-accepted `Client`: the
    /// `ServerCore` already drove it to `EXECUTING` before handing it to the handler.
    pub async fn start(&self) -> bool {
        match &self.side {
            CallSide::Outgoing(call) => call.lock().await.start().await,
            CallSide::Incoming(_) => false,
        }
    }

    pub async fn stop(&self) -> bool {
        match &self.side {
            CallSide::Outgoing(call) => call.lock().await.stop().await,
            CallSide::Incoming(call) => call.stop(FinishStatus::Ok).await,
        }
    }

    pub fn is_running(&self) -> bool {
        match &self.side {
            CallSide::Outgoing(call) => match call.try_lock() {
                Ok(call) => call.is_running(),
                // A start()/stop() is in flight; treat the call as still up until that
                // settles rather than blocking a synchronous query.
                Err(_) => true,
            },
            CallSide::Incoming(call) => call.is_running(),
        }
    }

    fn reader_sink(&self) -> Arc<Sink> {
        match &self.side {
            CallSide::Outgoing(call) => match call.try_lock() {
                Ok(call) => Arc::clone(call.reader_sink()),
                Err(_) => unreachable!("reader_sink is only read after start() has returned"),
            },
            CallSide::Incoming(call) => Arc::clone(call.reader_sink()),
        }
    }

    fn writer_sink(&self) -> Arc<Sink> {
        match &self.side {
            CallSide::Outgoing(call) => match call.try_lock() {
                Ok(call) => Arc::clone(call.writer_sink()),
                Err(_) => unreachable!("writer_sink is only read after start() has returned"),
            },
            CallSide::Incoming(call) => Arc::clone(call.writer_sink()),
        }
    }

    /// Typed write sugar: `Writer<T>::write` packs `T` into an `Envelope` tagged
    /// `T::TYPE_URL` and puts it on this call's `WriterSink`.
    pub fn writer<T: TypedMessage>(&self) -> Writer<T> {
        Writer::new(self.writer_sink())
    }

    /// Typed read sugar: `Reader<T>::read` waits for the next envelope tagged
    /// `T::TYPE_URL` and decodes it.
    pub fn reader<T: TypedMessage>(&self) -> Reader<T> {
        Reader::new(self.reader_sink())
    }

    /// Direct, untyped access for callers that want raw envelopes (the publisher fan-out
    /// path, or a `MessageHandler` dispatch loop).
    pub fn write_envelope(&self, envelope: Envelope) -> Result<(), Drained> {
        self.writer_sink().put(envelope)
    }

    pub async fn read_envelope(&self, timeout: Duration) -> Option<Envelope> {
        let sink = self.reader_sink();
        let envelope = sink.get(timeout).await;
        if envelope.is_some() {
            sink.pop();
        }
        envelope
    }

    fn identity(&self) -> usize {
        match &self.side {
            CallSide::Outgoing(call) => Arc::as_ptr(call) as usize,
            CallSide::Incoming(call) => Arc::as_ptr(call) as usize,
        }
    }

    pub fn same_call(&self, other: &Client) -> bool {
        self.identity() == other.identity()
    }
}

/// Typed write sugar bound to one call's `WriterSink`.
pub struct Writer<T> {
    sink: Arc<Sink>,
    _marker: PhantomData<fn(T)>,
}

impl<T: TypedMessage> Writer<T> {
    fn new(sink: Arc<Sink>) -> Self {
        Self {
            sink,
            _marker: PhantomData,
        }
    }

    pub fn write(&self, message: T) -> Result<(), Drained> {
        self.sink.put(Envelope::new(T::TYPE_URL, message.encode()))
    }
}

/// Typed read sugar bound to one call's `ReaderSink`.
pub struct Reader<T> {
    sink: Arc<Sink>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TypedMessage> Reader<T> {
    fn new(sink: Arc<Sink>) -> Self {
        Self {
            sink,
            _marker: PhantomData,
        }
    }

    /// Waits up to `timeout` for the next envelope, and decodes it if it carries
    /// `T::TYPE_URL`. A mismatched `type_url` is an ill-formed frame: it is dropped
    /// (popped and discarded) rather than returned.
    pub async fn read(&self, timeout: Duration) -> Option<T> {
        let envelope = self.sink.get(timeout).await?;
        self.sink.pop();
        if envelope.type_url != T::TYPE_URL {
            tracing::debug!(expected = T::TYPE_URL, actual = %envelope.type_url, "dropping mismatched envelope");
            return None;
        }
        T::decode(envelope.payload).ok()
    }
}

/// Dispatches raw envelopes by `type_url`: an envelope whose `type_url` has no
/// registered handler is delivered to the raw-envelope sink if one is registered,
/// otherwise dropped.
#[derive(Default)]
pub struct MessageHandler {
    handlers: std::collections::HashMap<&'static str, Box<dyn Fn(Bytes) + Send + Sync>>,
    raw_sink: Option<Arc<Sink>>,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler<T: TypedMessage>(&mut self, handler: impl Fn(T) + Send + Sync + 'static) {
        self.handlers.insert(
            T::TYPE_URL,
            Box::new(move |bytes| match T::decode(bytes) {
                Ok(message) => handler(message),
                Err(error) => tracing::debug!(%error, "failed to decode dispatched message"),
            }),
        );
    }

    /// Registers the fallback sink for envelopes whose `type_url` has no handler.
    pub fn set_raw_sink(&mut self, sink: Arc<Sink>) {
        self.raw_sink = Some(sink);
    }

    pub fn dispatch(&self, envelope: Envelope) {
        if let Some(handler) = self.handlers.get(envelope.type_url.as_str()) {
            handler(envelope.payload);
        } else if let Some(sink) = &self.raw_sink {
            let _ = sink.put(envelope);
        }
    }

    /// Drains `client`'s `ReaderSink` into this handler until the call stops running —
    /// the dispatcher-driven alternative to consuming envelopes directly off a
    /// `Reader<T>`.
    pub async fn run(self: Arc<Self>, client: Client) {
        while client.is_running() {
            if let Some(envelope) = client.read_envelope(Duration::from_millis(50)).await {
                self.dispatch(envelope);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("no registered connection factory matches technology tag `{0}`")]
    NoMatchingFactory(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// `Server`.
pub struct Server {
    core: ServerCore,
}

impl Server {
    pub async fn bind(
        factory: Arc<dyn ConnectionFactory>,
        cfg: NetworkConfig,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Self, CreateError> {
        let core = ServerCore::bind(factory, cfg, handler).await?;
        Ok(Self { core })
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub async fn stop(&self) -> bool {
        self.core.stop().await
    }

    pub fn active_clients(&self) -> usize {
        self.core.active_clients()
    }
}

/// `Publisher`: a `Server` whose `ClientHandler` is always a
/// `PublisherClientHandler`, with `send`/`subscriber_count` forwarded through.
pub struct Publisher {
    server: Server,
    handler: Arc<PublisherClientHandler>,
}

impl Publisher {
    pub async fn bind(factory: Arc<dyn ConnectionFactory>, cfg: NetworkConfig) -> Result<Self, CreateError> {
        let handler = PublisherClientHandler::new();
        let server = Server::bind(factory, cfg, Arc::clone(&handler) as Arc<dyn ClientHandler>).await?;
        Ok(Self { server, handler })
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    pub async fn stop(&self) -> bool {
        self.handler.release_clients().await;
        self.server.stop().await
    }

    pub fn subscriber_count(&self) -> usize {
        self.handler.subscriber_count()
    }

    /// Fans `envelope` out to every attached subscriber.
    pub async fn send(&self, envelope: Envelope) {
        self.handler.send(envelope).await;
    }

    pub async fn send_typed<T: TypedMessage>(&self, message: T) {
        self.send(Envelope::new(T::TYPE_URL, message.encode())).await;
    }
}

/// `Subscriber`: a `Client` that only ever reads. Making [`OutgoingCall`]'s pumps
/// independently optional would need a richer `OutgoingCall`; simply never putting
/// anything in the `WriterSink` has the same observable effect, since the writer pump
/// only acts when the sink is non-empty.
pub struct Subscriber {
    client: Client,
}

impl Subscriber {
    pub fn new(factory: Arc<dyn ConnectionFactory>, cfg: NetworkConfig) -> Self {
        Self {
            client: Client::new(factory, cfg),
        }
    }

    /// Fails (`false`) if no matching `Publisher` is reachable — for the `tcp`
    /// technology, a connect failure (e.g. a `Subscriber` started before its
    /// `Publisher` is listening).
    pub async fn start(&self) -> bool {
        self.client.start().await
    }

    pub async fn stop(&self) -> bool {
        self.client.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.client.is_running()
    }

    pub fn reader<T: TypedMessage>(&self) -> Reader<T> {
        self.client.reader()
    }
}

#[async_trait]
impl ClientHandler for () {
    async fn handle(&self, _client: Client, _keep_alive: &mut bool) -> bool {
        true
    }
}
