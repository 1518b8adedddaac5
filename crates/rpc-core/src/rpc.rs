//! The RPC handle of / §4.5: the state machine plus the in-flight
//! operation count that together gate reclamation of one call's resources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::state::{RpcState, StateMachine};

const AWAIT_FINISHED_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The outcome of a Finish/ServerFinish operation (table and §7's
/// "cancelled finish is considered success" rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStatus {
    Ok,
    Cancelled,
    Error,
}

impl FinishStatus {
    /// `stop()`'s return value is `status ∈ {OK, CANCELLED}`.
    pub fn is_success(self) -> bool {
        matches!(self, FinishStatus::Ok | FinishStatus::Cancelled)
    }
}

/// `{ state, ops_in_flight }` from The transport call and its context
/// (`call: TransportCall`, `ctx: CallContext`) are owned one layer up, by
/// `OutgoingCall`/`IncomingCall`, since in this workspace they are just the split
/// reader/writer halves of a `TransportChannel` — there is no separate context object
/// to hold here.
pub struct RpcHandle {
    state: StateMachine,
    ops_in_flight: AtomicU32,
}

impl RpcHandle {
    pub fn new(on_change: impl Fn(RpcState, RpcState) + Send + Sync + 'static) -> Self {
        Self {
            state: StateMachine::new(on_change),
            ops_in_flight: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    /// `CREATED -> INITIALIZING`. Returns `false` if the call was not `CREATED`.
    pub fn initialize(&self) -> bool {
        self.state.set_state(RpcState::Initializing)
    }

    /// `EXECUTING | INACTIVE -> DISPOSING`. Returns `false` otherwise.
    pub fn dispose(&self) -> bool {
        self.state.set_state(RpcState::Disposing)
    }

    pub fn start_operation(&self) {
        self.ops_in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub fn finish_operation(&self) {
        self.ops_in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn ops_in_flight(&self) -> u32 {
        self.ops_in_flight.load(Ordering::Acquire)
    }

    /// `state == FINISHED && ops_in_flight == 0`.
    pub fn is_finished(&self) -> bool {
        self.state.get_state() == RpcState::Finished && self.ops_in_flight() == 0
    }

    /// Spin-yields at `AWAIT_FINISHED_POLL_INTERVAL` granularity until
    /// `(state in {FINISHED, CREATED}) && ops_in_flight == 0`. The `CREATED` branch is
    /// for handles that were never `initialize()`d — there is nothing to wait for.
    pub async fn await_finished(&self) {
        loop {
            let state = self.state.get_state();
            let settled = matches!(state, RpcState::Finished | RpcState::Created);
            if settled && self.ops_in_flight() == 0 {
                return;
            }
            tokio::time::sleep(AWAIT_FINISHED_POLL_INTERVAL).await;
        }
    }
}
