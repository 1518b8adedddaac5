//! Bounded FIFOs of envelopes bridging a pump and the application.
//!
//! `get` is a non-consuming peek: the writer pump inspects the head, attempts a
//! failable write, and only calls `pop` once that write actually succeeds — a
//! peek-then-commit transaction, not a plain dequeue.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use rpc_envelope::Envelope;
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
#[error("sink is drained")]
pub struct Drained;

struct Inner {
    queue: VecDeque<Envelope>,
    drained: bool,
}

/// A bounded FIFO of envelopes. `ReaderSink` and `WriterSink` are the same type under
/// two names, matching the symmetry in §4.2.
pub struct Sink {
    inner: Mutex<Inner>,
    notify: Notify,
}

pub type ReaderSink = Sink;
pub type WriterSink = Sink;

impl Sink {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                drained: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends `envelope` to the tail. Fails if the sink has been drained.
    pub fn put(&self, envelope: Envelope) -> Result<(), Drained> {
        {
            let mut inner = self.inner.lock();
            if inner.drained {
                return Err(Drained);
            }
            inner.queue.push_back(envelope);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Non-destructively reads the head, waiting up to `timeout` for one to appear.
    /// Returns `None` on timeout or once the sink is drained.
    pub async fn get(&self, timeout: Duration) -> Option<Envelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock();
                if inner.drained {
                    return None;
                }
                if let Some(envelope) = inner.queue.front() {
                    return Some(envelope.clone());
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(remaining) => return None,
            }
        }
    }

    /// Removes the head. Precondition: a prior `get` observed a value; callers other
    /// than the owning pump must not call this concurrently.
    pub fn pop(&self) -> Option<Envelope> {
        self.inner.lock().queue.pop_front()
    }

    /// Empties the queue, marks it drained, and wakes every waiter. Idempotent.
    pub fn drain(&self) {
        {
            let mut inner = self.inner.lock();
            inner.drained = true;
            inner.queue.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_drained(&self) -> bool {
        self.inner.lock().drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Sink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn envelope(tag: &str) -> Envelope {
        Envelope::new(tag, Bytes::from_static(b"payload"))
    }

    #[tokio::test]
    async fn get_is_non_consuming() {
        let sink = Sink::new();
        sink.put(envelope("a")).unwrap();

        let first = sink.get(Duration::from_millis(10)).await.unwrap();
        let second = sink.get(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.type_url, "a");
        assert_eq!(second.type_url, "a");
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn pop_removes_only_after_get() {
        let sink = Sink::new();
        sink.put(envelope("a")).unwrap();
        sink.put(envelope("b")).unwrap();

        let head = sink.get(Duration::from_millis(10)).await.unwrap();
        assert_eq!(head.type_url, "a");
        let popped = sink.pop().unwrap();
        assert_eq!(popped.type_url, "a");

        let head = sink.get(Duration::from_millis(10)).await.unwrap();
        assert_eq!(head.type_url, "b");
    }

    #[tokio::test]
    async fn get_times_out_on_empty_sink() {
        let sink = Sink::new();
        let result = sink.get(Duration::from_millis(5)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn drain_wakes_waiters_with_failure() {
        let sink = Arc::new(Sink::new());
        let waiter = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.get(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.drain();

        let result = waiter.await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn put_after_drain_fails() {
        let sink = Sink::new();
        sink.drain();
        assert!(sink.put(envelope("a")).is_err());
    }
}
