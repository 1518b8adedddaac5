//! The six-state FSM gating every side effect on an RPC call.

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcState {
    Created,
    Initializing,
    Executing,
    Inactive,
    Disposing,
    Finished,
}

/// Exactly the transition table of this system's state diagram; anything not listed
/// here is a silent no-op, never a panic.
fn is_allowed(from: RpcState, to: RpcState) -> bool {
    use RpcState::*;
    matches!(
        (from, to),
        (Created, Initializing)
            | (Initializing, Executing)
            | (Initializing, Inactive)
            | (Initializing, Finished)
            | (Executing, Inactive)
            | (Executing, Disposing)
            | (Executing, Finished)
            | (Inactive, Inactive)
            | (Inactive, Disposing)
            | (Inactive, Finished)
            | (Disposing, Finished)
    )
}

/// A mutex-protected `RpcState` with a transition table and a post-unlock callback.
///
/// The callback runs after the lock is released, so it must not call back into
/// `set_state` on the same thread — doing so would observe the state mid-transition
/// from a caller still holding a borrow across the callback, not a deadlock, but a
/// logic error this type does nothing to prevent.
pub struct StateMachine {
    state: Mutex<RpcState>,
    on_change: Box<dyn Fn(RpcState, RpcState) + Send + Sync>,
}

impl StateMachine {
    pub fn new(on_change: impl Fn(RpcState, RpcState) + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(RpcState::Created),
            on_change: Box::new(on_change),
        }
    }

    /// Attempts the transition `current -> to`. Returns `true` if it was allowed and
    /// applied, `false` if it was rejected (state left unchanged).
    pub fn set_state(&self, to: RpcState) -> bool {
        let from = {
            let mut guard = self.state.lock();
            let from = *guard;
            if !is_allowed(from, to) {
                return false;
            }
            *guard = to;
            from
        };
        (self.on_change)(from, to);
        true
    }

    pub fn get_state(&self) -> RpcState {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn allowed_transitions_apply_and_fire_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let sm = StateMachine::new(move |_from, _to| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sm.set_state(RpcState::Initializing));
        assert_eq!(sm.get_state(), RpcState::Initializing);
        assert!(sm.set_state(RpcState::Executing));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disallowed_transition_is_a_silent_no_op() {
        let sm = StateMachine::new(|_, _| {});
        assert!(!sm.set_state(RpcState::Executing));
        assert_eq!(sm.get_state(), RpcState::Created);
    }

    #[test]
    fn finished_is_terminal() {
        let sm = StateMachine::new(|_, _| {});
        assert!(sm.set_state(RpcState::Initializing));
        assert!(sm.set_state(RpcState::Finished));
        assert!(!sm.set_state(RpcState::Executing));
        assert!(!sm.set_state(RpcState::Created));
    }

    #[test]
    fn inactive_self_loop_is_allowed() {
        let sm = StateMachine::new(|_, _| {});
        assert!(sm.set_state(RpcState::Initializing));
        assert!(sm.set_state(RpcState::Executing));
        assert!(sm.set_state(RpcState::Inactive));
        assert!(sm.set_state(RpcState::Inactive));
    }
}
