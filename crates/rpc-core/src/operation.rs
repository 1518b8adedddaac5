//! The generic one-shot operation shape this engine is built from, rendered for `tokio`.
//!
//! An operation is an owned object whose `start()` posts exactly one async call to the
//! transport and whose completion callback fires once, later, off of a completion
//! queue. The classic C++ version of this pattern carries a real hazard: a tag
//! outstanding past the operation's own destruction. Safe Rust does not have that
//! hazard: an `Arc` keeps the operation's bookkeeping alive for exactly as long as
//! something is still waiting on it, so there is no dangling-tag case to guard against,
//! and the reader/writer pumps do not need to keep a completed op around for one more
//! tick (see `pump.rs`).
//!
//! What *does* still need to hold is single-flight: at most one of an operation's
//! `start()` calls may be outstanding at a time. `OperationState` is that guard.
//! `launch` is the rest of the generic shape: it spawns
//! the one async call as its own `tokio` task, and when that call finishes, posts a
//! `CompletionEvent` onto the given `CompletionQueue` whose tag does the bookkeeping
//! (`ops_in_flight` accounting, flipping the guard back to idle) before handing control
//! to the operation-specific `on_complete`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::completion_queue::{CompletionEvent, CompletionQueue};
use crate::rpc::RpcHandle;
use crate::state::RpcState;

/// Tracks whether one operation's single call is currently outstanding.
///
/// One `OperationState` is created per *chain* of restarts: the reader pump allocates a
/// fresh one for every Read rather than reusing the one from the previous completion.
#[derive(Default)]
pub struct OperationState {
    in_progress: AtomicBool,
}

impl OperationState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Flips idle -> in-progress. Returns `false` if already in progress.
    fn try_begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.in_progress.store(false, Ordering::Release);
    }
}

/// Spawns `body` as the operation's one posted async call and arranges for its result
/// to reach `on_complete` through `queue`, matching every other completion in the
/// system. Returns `false` without doing anything if the RPC is already terminal or if
/// `state` is already in progress — the same refusal `start()` specifies.
///
/// `accounts_as_running` mirrors the per-operation flag in §3: Read, Write, Connect,
/// Request, and Finish/ServerFinish all increment/decrement `rpc.ops_in_flight`; `Done`
/// does not.
pub fn launch<Fut, T>(
    state: &Arc<OperationState>,
    rpc: &Arc<RpcHandle>,
    queue: &CompletionQueue,
    accounts_as_running: bool,
    body: Fut,
    on_complete: impl FnOnce(T, bool) + Send + 'static,
) -> bool
where
    Fut: Future<Output = (T, bool)> + Send + 'static,
    T: Send + 'static,
{
    if rpc.state().get_state() == RpcState::Finished {
        return false;
    }
    if !state.try_begin() {
        return false;
    }
    if accounts_as_running {
        rpc.start_operation();
    }

    let sender = queue.sender();
    let state = Arc::clone(state);
    let rpc = Arc::clone(rpc);
    tokio::spawn(async move {
        let (value, ok) = body.await;
        let event = CompletionEvent::new(ok, move |ok| {
            state.finish();
            if accounts_as_running {
                rpc.finish_operation();
            }
            on_complete(value, ok);
        });
        // The receiving side only ever goes away when the whole call is being torn
        // down, at which point losing this particular completion is harmless.
        let _ = sender.send_async(event).await;
    });

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn rpc() -> Arc<RpcHandle> {
        Arc::new(RpcHandle::new(|_, _| {}))
    }

    #[tokio::test]
    async fn second_start_is_refused_while_first_in_progress() {
        let state = OperationState::new();
        let rpc = rpc();
        let queue = CompletionQueue::new();

        let started_first = launch(
            &state,
            &rpc,
            &queue,
            true,
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ((), true)
            },
            |(), _ok| {},
        );
        assert!(started_first);
        assert_eq!(rpc.ops_in_flight(), 1);

        let started_second = launch(&state, &rpc, &queue, true, async { ((), true) }, |(), _| {});
        assert!(!started_second);
    }

    #[tokio::test]
    async fn refuses_to_start_once_rpc_is_finished() {
        let state = OperationState::new();
        let rpc = rpc();
        assert!(rpc.initialize());
        rpc.state().set_state(RpcState::Finished);

        let started = launch(&state, &rpc, &CompletionQueue::new(), false, async { ((), true) }, |(), _| {});
        assert!(!started);
    }

    #[tokio::test]
    async fn completion_runs_on_complete_exactly_once() {
        let state = OperationState::new();
        let rpc = rpc();
        let queue = CompletionQueue::new();
        let mut executor = crate::completion_queue::CompletionQueueExecutor::start(&queue, 1);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        launch(&state, &rpc, &queue, true, async { (42, true) }, move |value, ok| {
            assert_eq!(value, 42);
            assert!(ok);
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rpc.ops_in_flight(), 0);
        executor.stop();
    }

    #[tokio::test]
    async fn restart_after_completion_is_allowed() {
        let state = OperationState::new();
        let rpc = rpc();
        let queue = CompletionQueue::new();
        let mut executor = crate::completion_queue::CompletionQueueExecutor::start(&queue, 1);

        launch(&state, &rpc, &queue, false, async { ((), true) }, |(), _| {});
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started_again = launch(&state, &rpc, &queue, false, async { ((), true) }, |(), _| {});
        assert!(started_again);
        executor.stop();
    }
}
