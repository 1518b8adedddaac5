//! `ServerCore`: binds a listening endpoint, keeps exactly
//! `worker_threads` `IncomingCall` placeholders posted at all times, and hands accepted
//! calls to a user-supplied [`ClientHandler`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use rpc_transport::{ConnectionFactory, NetworkConfig, TransportError};
use tokio::sync::Mutex as AsyncMutex;

use crate::api::Client;
use crate::client_manager::ClientManager;
use crate::completion_queue::{CompletionQueue, CompletionQueueExecutor};
use crate::incoming::{IncomingCall, SharedAcceptor};
use crate::rpc::FinishStatus;

/// The user-supplied callback pair invoked per accepted call (§6,
/// `ClientHandler` in the glossary).
#[async_trait]
pub trait ClientHandler: Send + Sync {
    /// Called before any reader/writer starts pumping for `client`.
    fn configure_client(&self, client: &Client) {
        let _ = client;
    }

    /// Called once per accepted call. `keep_alive` starts `false`; set it to `true` to
    /// leave the call open after this returns (the publisher handler always does).
    /// Returning `false` shuts the whole server down.
    async fn handle(&self, client: Client, keep_alive: &mut bool) -> bool;
}

struct Shared {
    acceptor: SharedAcceptor,
    queue: CompletionQueue,
    executor: SyncMutex<Option<CompletionQueueExecutor>>,
    manager: Arc<ClientManager>,
    running: AtomicBool,
    handler: Arc<dyn ClientHandler>,
    worker_threads: u32,
}

/// Owns the transport server, the shared completion-queue executor, the
/// `ClientManager`, and the user's `ClientHandler`.
pub struct ServerCore {
    shared: Arc<Shared>,
}

impl ServerCore {
    /// `start()`. Binding failure (including "a second bind on the same
    /// port must fail") surfaces as `Err`.
    pub async fn bind(
        factory: Arc<dyn ConnectionFactory>,
        cfg: NetworkConfig,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Self, TransportError> {
        let acceptor = factory.bind(&cfg).await?;
        let worker_threads = cfg.worker_threads().max(1);
        let queue = CompletionQueue::new();
        let executor = CompletionQueueExecutor::start(&queue, worker_threads);
        let manager = ClientManager::start();

        let shared = Arc::new(Shared {
            acceptor: Arc::new(AsyncMutex::new(acceptor)),
            queue,
            executor: SyncMutex::new(Some(executor)),
            manager,
            running: AtomicBool::new(true),
            handler,
            worker_threads,
        });

        for _ in 0..shared.worker_threads {
            spawn_placeholder(&shared);
        }

        Ok(Self { shared })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn active_clients(&self) -> usize {
        self.shared.manager.len()
    }

    /// `stop()`.
    pub async fn stop(&self) -> bool {
        shutdown(&self.shared).await
    }
}

/// Pre-creates one `IncomingCall` placeholder and registers it with the manager,
/// matching "at any time while running, exactly `worker_threads` Request
/// operations are posted" invariant.
fn spawn_placeholder(shared: &Arc<Shared>) {
    if !shared.running.load(Ordering::Acquire) {
        return;
    }

    let call = IncomingCall::new(shared.queue.clone());
    shared.manager.track(Arc::clone(&call));

    let shared_for_connect = Arc::clone(shared);
    call.start(
        Arc::clone(&shared.acceptor),
        move |accepted| on_client_connected(shared_for_connect, accepted),
        |_finished| {
            // No extra bookkeeping: the `ClientManager` sweep is what actually reaps.
        },
    );
}

/// `on_client_connected`: pre-post a replacement placeholder first (so
/// the accept slot is never vacant), then hand the call to the user's handler.
fn on_client_connected(shared: Arc<Shared>, accepted: Arc<IncomingCall>) {
    if !shared.running.load(Ordering::Acquire) {
        return;
    }

    spawn_placeholder(&shared);

    tokio::spawn(async move {
        let client = Client::from_incoming(Arc::clone(&accepted));
        shared.handler.configure_client(&client);

        let mut keep_alive = false;
        let should_continue = shared.handler.handle(client, &mut keep_alive).await;

        if !keep_alive {
            accepted.stop(FinishStatus::Ok).await;
        }
        if !should_continue {
            shutdown(&shared).await;
        }
    });
}

/// `shutdown()`.
async fn shutdown(shared: &Arc<Shared>) -> bool {
    if !shared.running.swap(false, Ordering::AcqRel) {
        // Already shut down; idempotent.
        return true;
    }

    shared.manager.finish_all().await;

    if let Some(mut executor) = shared.executor.lock().take() {
        executor.stop();
    }

    shared.manager.clear();
    true
}
