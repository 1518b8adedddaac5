//! `IncomingCall`: the server side of one accepted RPC. Mirrors
//! `OutgoingCall`, registering Request/Done instead of Connect, and ServerFinish
//! instead of Finish.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use rpc_transport::TransportAcceptor;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::completion_queue::CompletionQueue;
use crate::operation::{self, OperationState};
use crate::pump::{ReaderPump, SharedReader, SharedWriter, WriterPump};
use crate::rpc::{FinishStatus, RpcHandle};
use crate::sink::Sink;
use crate::state::RpcState;

/// An acceptor shared by every `IncomingCall` placeholder a `ServerCore` keeps posted;
/// `accept()` takes `&mut self`, so placeholders serialize through this lock the way
/// completion queue serializes delivery of one accept event at a time.
pub type SharedAcceptor = Arc<AsyncMutex<Box<dyn TransportAcceptor>>>;

/// The server side of one accepted call. Always held behind an `Arc`: `ClientManager`
/// relies on `Arc::strong_count` to know when nobody but itself still references a
/// finished call .
pub struct IncomingCall {
    rpc: Arc<RpcHandle>,
    queue: CompletionQueue,
    cancel: CancellationToken,
    reader_sink: Arc<Sink>,
    writer_sink: Arc<Sink>,
    reader_pump: SyncMutex<Option<ReaderPump>>,
    writer_pump: SyncMutex<Option<WriterPump>>,
}

impl IncomingCall {
    pub fn new(queue: CompletionQueue) -> Arc<Self> {
        Arc::new(Self {
            rpc: Arc::new(RpcHandle::new(|from, to| {
                tracing::debug!(?from, ?to, "incoming call state transition");
            })),
            queue,
            cancel: CancellationToken::new(),
            reader_sink: Arc::new(Sink::new()),
            writer_sink: Arc::new(Sink::new()),
            reader_pump: SyncMutex::new(None),
            writer_pump: SyncMutex::new(None),
        })
    }

    pub fn reader_sink(&self) -> &Arc<Sink> {
        &self.reader_sink
    }

    pub fn writer_sink(&self) -> &Arc<Sink> {
        &self.writer_sink
    }

    pub fn state(&self) -> RpcState {
        self.rpc.state().get_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RpcState::Executing
    }

    /// construction: registers a Done op, then `start()`s (advances to
    /// `INITIALIZING` and posts a Request). `on_connected` is the connection callback
    /// fired once the Request op completes successfully; `on_finished` is invoked once
    /// this call has fully wound down (it is what lets `ClientManager` learn the call is
    /// reapable).
    pub fn start(
        self: &Arc<Self>,
        acceptor: SharedAcceptor,
        on_connected: impl FnOnce(Arc<IncomingCall>) + Send + 'static,
        on_finished: impl FnOnce(Arc<IncomingCall>) + Send + 'static,
    ) -> bool {
        if !self.rpc.initialize() {
            return false;
        }
        self.spawn_done(on_finished);
        self.spawn_request(acceptor, self.cancel.clone(), on_connected);
        true
    }

    /// The Done op does not post a single async call the way the generic
    /// [`operation::launch`] shape expects; it watches for the call settling into
    /// `INACTIVE` on its own (peer loss, a Read/Write failure) and finalizes it, or
    /// simply observes an explicit `stop()` reaching `FINISHED`. Per table,
    /// Done does not count toward `ops_in_flight`.
    fn spawn_done(self: &Arc<Self>, on_finished: impl FnOnce(Arc<IncomingCall>) + Send + 'static) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match this.state() {
                    RpcState::Inactive => {
                        this.stop(FinishStatus::Ok).await;
                        break;
                    }
                    RpcState::Finished => break,
                    _ => {}
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            on_finished(this);
        });
    }

    fn spawn_request(
        self: &Arc<Self>,
        acceptor: SharedAcceptor,
        cancel: CancellationToken,
        on_connected: impl FnOnce(Arc<IncomingCall>) + Send + 'static,
    ) {
        let state = OperationState::new();
        let rpc = Arc::clone(&self.rpc);
        let this = Arc::clone(self);

        operation::launch(
            &state,
            &self.rpc,
            &self.queue,
            true,
            async move {
                let mut guard = acceptor.lock().await;
                tokio::select! {
                    result = guard.accept() => match result {
                        Ok(channel) => (Some(channel), true),
                        Err(error) => {
                            tracing::debug!(%error, "accept failed");
                            (None, false)
                        }
                    },
                    () = cancel.cancelled() => (None, false),
                }
            },
            move |channel, ok| {
                rpc.state().set_state(if ok { RpcState::Executing } else { RpcState::Finished });

                if let Some(channel) = channel {
                    let (reader, writer) = channel.split();
                    let reader: SharedReader = Arc::new(AsyncMutex::new(reader));
                    let writer: SharedWriter = Arc::new(AsyncMutex::new(writer));

                    *this.reader_pump.lock() = Some(ReaderPump::start(
                        Arc::clone(&this.rpc),
                        this.queue.clone(),
                        reader,
                        Arc::clone(&this.reader_sink),
                        this.cancel.clone(),
                    ));
                    *this.writer_pump.lock() = Some(WriterPump::start(
                        Arc::clone(&this.rpc),
                        this.queue.clone(),
                        writer,
                        Arc::clone(&this.writer_sink),
                        this.cancel.clone(),
                    ));

                    on_connected(this);
                }
            },
        );
    }

    /// `stop(status)`: `rpc.dispose()`; post `ServerFinish(status)` if
    /// the transition happened; then dispose of the pumps.
    pub async fn stop(self: &Arc<Self>, _status: FinishStatus) -> bool {
        let disposing = self.rpc.dispose();

        if disposing {
            self.post_server_finish();
        }

        self.cancel.cancel();
        self.reader_sink.drain();
        self.writer_sink.drain();
        *self.reader_pump.lock() = None;
        *self.writer_pump.lock() = None;

        self.rpc.await_finished().await;

        disposing || matches!(self.state(), RpcState::Created | RpcState::Finished)
    }

    fn post_server_finish(self: &Arc<Self>) {
        let state = OperationState::new();
        let rpc = Arc::clone(&self.rpc);
        operation::launch(&state, &self.rpc, &self.queue, true, async { ((), true) }, move |(), _ok| {
            rpc.state().set_state(RpcState::Finished);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion_queue::CompletionQueueExecutor;
    use rpc_transport::tcp::TcpConnectionFactory;
    use rpc_transport::{ConnectionFactory, NetworkConfig};

    #[tokio::test]
    async fn request_completes_and_runs_a_round_trip() {
        let port = portpicker::pick_unused_port().expect("a free port");
        let cfg = NetworkConfig::new("127.0.0.1", port, TcpConnectionFactory::TECHNOLOGY_TAG);
        let factory = TcpConnectionFactory::new();
        let acceptor: SharedAcceptor = Arc::new(AsyncMutex::new(factory.bind(&cfg).await.expect("bind succeeds")));

        let queue = CompletionQueue::new();
        let mut executor = CompletionQueueExecutor::start(&queue, 2);
        let call = IncomingCall::new(queue);

        let (connected_tx, connected_rx) = tokio::sync::oneshot::channel();
        call.start(acceptor, move |call| { let _ = connected_tx.send(call); }, |_| {});

        let client_cfg = cfg.clone();
        let client = tokio::spawn(async move {
            let factory = TcpConnectionFactory::new();
            factory.connect(&client_cfg).await
        });

        let connected = connected_rx.await.expect("connection callback fires");
        assert!(connected.is_running());
        client.await.unwrap().expect("client connects");

        connected.stop(FinishStatus::Ok).await;
        executor.stop();
    }
}
