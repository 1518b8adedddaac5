//! The completion-queue executor: N worker tasks pulling `(tag, ok)` events and
//! invoking the tag's processor.
//!
//! There is no literal polling loop here (an `async_next` with a zero deadline,
//! yielding every ~10ms): that cadence is a latency bound some completion-queue designs
//! accept, not a correctness requirement, and this one uses an explicit wake-up instead
//! since the runtime exposes one. Every posted
//! operation already runs inside its own `tokio` task; that task's completion *is* the
//! wake-up. So a completion is a `CompletionEvent` pushed into a shared `flume`
//! channel, and a worker is just `recv_async().await` in a loop. `flume` rather than
//! `tokio::mpsc` because the channel needs N independent consumers, not one.

use rpc_task::ChildTask;

/// One `(tag, ok)` pair: `tag` is the operation's completion callback, boxed so the
/// queue does not need to know the operation's concrete type.
pub struct CompletionEvent {
    pub ok: bool,
    pub tag: Box<dyn FnOnce(bool) + Send>,
}

impl CompletionEvent {
    pub fn new(ok: bool, tag: impl FnOnce(bool) + Send + 'static) -> Self {
        Self { ok, tag: Box::new(tag) }
    }

    fn fire(self) {
        (self.tag)(self.ok);
    }
}

/// A completion queue: one per `OutgoingCall`, one shared by a `Server`.
#[derive(Clone)]
pub struct CompletionQueue {
    sender: flume::Sender<CompletionEvent>,
    receiver: flume::Receiver<CompletionEvent>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    /// A handle operations use to post completions. Cloning is cheap; every spawned
    /// operation task gets its own clone.
    pub fn sender(&self) -> flume::Sender<CompletionEvent> {
        self.sender.clone()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `n` cooperating workers against a `CompletionQueue` until stopped.
pub struct CompletionQueueExecutor {
    workers: Vec<ChildTask<()>>,
}

impl CompletionQueueExecutor {
    /// Spawns `n` workers, each looping `recv_async` on `queue` and invoking the tag
    /// of every event it receives. Dropping the queue's sender side (all operations
    /// finished posting) makes `recv_async` return `Err`, at which point a worker
    /// exits — the async equivalent of observing `SHUTDOWN`.
    pub fn start(queue: &CompletionQueue, n: u32) -> Self {
        let workers = (0..n.max(1))
            .map(|_| {
                let receiver = queue.receiver.clone();
                ChildTask::spawn(async move {
                    while let Ok(event) = receiver.recv_async().await {
                        event.fire();
                    }
                })
            })
            .collect();

        Self { workers }
    }

    /// Aborts every worker. Matches `stop()`: shut down the queue, wait for
    /// workers to observe it, join — here, abort is immediate and safe because an
    /// operation's tag is only ever invoked once and its destruction is handled by the
    /// owning pump, not by the executor.
    pub fn stop(&mut self) {
        for worker in self.workers.drain(..) {
            worker.abort();
        }
    }
}

impl Drop for CompletionQueueExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}
