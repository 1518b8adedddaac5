//! `ClientManager`: reaps `IncomingCall`s nobody but the manager
//! still references, on a 100ms sweep rather than synchronously, so that a client's own
//! task tearing down the server cannot deadlock against itself.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use rpc_task::ScheduledTask;

use crate::incoming::IncomingCall;
use crate::rpc::FinishStatus;

const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

struct Inner {
    clients: VecDeque<Arc<IncomingCall>>,
}

/// Holds every `IncomingCall` a `ServerCore` has ever posted (as a placeholder or an
/// accepted call) until it is safe to drop.
pub struct ClientManager {
    inner: SyncMutex<Inner>,
    ticker: SyncMutex<Option<ScheduledTask>>,
}

impl ClientManager {
    /// Starts the manager and its periodic sweep. The sweep stops when the manager
    /// itself is dropped (`ScheduledTask`'s own `Drop` aborts its task).
    pub fn start() -> Arc<Self> {
        let manager = Arc::new(Self {
            inner: SyncMutex::new(Inner { clients: VecDeque::new() }),
            ticker: SyncMutex::new(None),
        });

        let sweeper = Arc::clone(&manager);
        let ticker = ScheduledTask::spawn(SWEEP_INTERVAL, move || {
            let manager = Arc::clone(&sweeper);
            async move { manager.sweep().await }
        });
        *manager.ticker.lock() = Some(ticker);

        manager
    }

    pub fn track(&self, call: Arc<IncomingCall>) {
        self.inner.lock().clients.push_back(call);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walks the deque and, for any wrapper that is no longer running *and* whose
    /// reference count is 1 (nobody but this manager holds it), removes it from the
    /// deque and disposes it outside the lock: the client's own task may be
    /// mid-shutdown, and reaping from inside the lock (or from that same call stack)
    /// risks deadlock or self-join.
    async fn sweep(&self) {
        let reapable: Vec<Arc<IncomingCall>> = {
            let mut inner = self.inner.lock();
            let mut reapable = Vec::new();
            inner.clients.retain(|call| {
                let keep = call.is_running() || Arc::strong_count(call) > 1;
                if !keep {
                    reapable.push(Arc::clone(call));
                }
                keep
            });
            reapable
        };

        for call in reapable {
            call.stop(FinishStatus::Ok).await;
        }
    }

    /// Posts `ServerFinish` on every tracked call (`shutdown()` step 1).
    pub async fn finish_all(&self) {
        let clients: Vec<Arc<IncomingCall>> = self.inner.lock().clients.iter().cloned().collect();
        for call in clients {
            call.stop(FinishStatus::Ok).await;
        }
    }

    /// Destroys every entry (`shutdown()` step 5).
    pub fn clear(&self) {
        self.inner.lock().clients.clear();
    }
}
