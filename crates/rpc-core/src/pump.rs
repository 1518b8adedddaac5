//! Reader pump / writer pump (/ §4.8): the long-lived loops that keep
//! exactly one Read (resp. Write) operation in flight for as long as the call runs.
//!
//! Both pumps are self-perpetuating chains of [`operation::launch`] calls rather than
//! an explicit loop: the Read (or Write) operation's own completion callback decides
//! whether to launch the next one. That is exactly what describes ("the pump
//! atomically replaces the active Read op with a freshly created one and starts it");
//! there is no separate pump task to manage because in safe Rust there is no lifetime
//! hazard in letting the just-completed operation's `Arc`s simply drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpc_envelope::Envelope;
use rpc_task::ScheduledTask;
use rpc_transport::{BoxedReader, BoxedWriter};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::completion_queue::CompletionQueue;
use crate::operation::{self, OperationState};
use crate::rpc::RpcHandle;
use crate::sink::Sink;
use crate::state::RpcState;

pub type SharedReader = Arc<AsyncMutex<BoxedReader>>;
pub type SharedWriter = Arc<AsyncMutex<BoxedWriter>>;

const WRITER_TICK: Duration = Duration::from_millis(10);

/// Keeps exactly one Read operation in flight and feeds every successfully decoded
/// envelope into `sink`
///
/// Unlike the writer pump, there is no periodic ticker or other resource to hold: the
/// chain keeps itself alive, and stops on its own once the RPC becomes terminal.
pub struct ReaderPump;

impl ReaderPump {
    pub fn start(
        rpc: Arc<RpcHandle>,
        queue: CompletionQueue,
        reader: SharedReader,
        sink: Arc<Sink>,
        cancel: CancellationToken,
    ) -> Self {
        spawn_read(rpc, queue, reader, sink, cancel);
        Self
    }
}

fn spawn_read(rpc: Arc<RpcHandle>, queue: CompletionQueue, reader: SharedReader, sink: Arc<Sink>, cancel: CancellationToken) {
    let state = OperationState::new();
    let body = {
        let reader = Arc::clone(&reader);
        let cancel = cancel.clone();
        async move {
            let mut guard = reader.lock().await;
            tokio::select! {
                result = guard.read() => match result {
                    Ok(envelope) => (Some(envelope), true),
                    Err(error) => {
                        tracing::debug!(%error, "read operation failed, call going inactive");
                        (None, false)
                    }
                },
                () = cancel.cancelled() => (None, false),
            }
        }
    };

    operation::launch(&state, &rpc, &queue, true, body, move |result: Option<Envelope>, ok| {
        if ok {
            if let Some(envelope) = result {
                // Already self-describing on this wire; no extra packing step needed
                // (spec.md's "pack if not already an Envelope" is a no-op here because
                // the transport layer only ever carries envelopes).
                if sink.put(envelope).is_err() {
                    return;
                }
            }
            spawn_read(rpc, queue, reader, sink, cancel);
        } else {
            rpc.state().set_state(RpcState::Inactive);
            sink.drain();
        }
    });
}

enum WriteOutcome {
    Empty,
    Written,
    Failed,
}

/// Keeps exactly one Write operation in flight while `sink` has envelopes to send, per
/// Driven by a 10ms tick that only matters for *starting* the first
/// write after the sink has been empty; once a write chain is running it restarts
/// itself immediately, the same as the reader pump.
pub struct WriterPump {
    active: Arc<AtomicBool>,
    ticker: ScheduledTask,
}

impl WriterPump {
    pub fn start(
        rpc: Arc<RpcHandle>,
        queue: CompletionQueue,
        writer: SharedWriter,
        sink: Arc<Sink>,
        cancel: CancellationToken,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(false));

        let ticker = ScheduledTask::spawn(WRITER_TICK, {
            let active = Arc::clone(&active);
            move || {
                let rpc = Arc::clone(&rpc);
                let queue = queue.clone();
                let writer = Arc::clone(&writer);
                let sink = Arc::clone(&sink);
                let active = Arc::clone(&active);
                let cancel = cancel.clone();
                async move {
                    if active.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    if sink.get(Duration::ZERO).await.is_some() {
                        spawn_write(rpc, queue, writer, sink, active, cancel);
                    } else {
                        active.store(false, Ordering::Release);
                    }
                }
            }
        });

        Self { active, ticker }
    }
}

impl Drop for WriterPump {
    fn drop(&mut self) {
        self.ticker.stop();
    }
}

fn spawn_write(
    rpc: Arc<RpcHandle>,
    queue: CompletionQueue,
    writer: SharedWriter,
    sink: Arc<Sink>,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let state = OperationState::new();
    let body = {
        let writer = Arc::clone(&writer);
        let sink = Arc::clone(&sink);
        let cancel = cancel.clone();
        async move {
            // Peek-then-commit: the write is only "committed" (popped) once it lands.
            let Some(envelope) = sink.get(Duration::ZERO).await else {
                return (WriteOutcome::Empty, true);
            };
            let mut guard = writer.lock().await;
            tokio::select! {
                result = guard.write(envelope) => match result {
                    Ok(()) => (WriteOutcome::Written, true),
                    Err(error) => {
                        tracing::debug!(%error, "write operation failed, call going inactive");
                        (WriteOutcome::Failed, false)
                    }
                },
                () = cancel.cancelled() => (WriteOutcome::Failed, false),
            }
        }
    };

    let started = operation::launch(&state, &rpc, &queue, true, body, move |outcome, _ok| match outcome {
        WriteOutcome::Empty => {
            active.store(false, Ordering::Release);
        }
        WriteOutcome::Written => {
            sink.pop();
            spawn_write(rpc, queue, writer, sink, active, cancel);
        }
        WriteOutcome::Failed => {
            rpc.state().set_state(RpcState::Inactive);
            sink.drain();
            active.store(false, Ordering::Release);
        }
    });

    if !started {
        active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use rpc_transport::{EnvelopeReader, EnvelopeWriter, TransportError};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ChannelReader {
        queue: Arc<StdMutex<VecDeque<Envelope>>>,
    }

    #[async_trait]
    impl EnvelopeReader for ChannelReader {
        async fn read(&mut self) -> Result<Envelope, TransportError> {
            loop {
                if let Some(envelope) = self.queue.lock().unwrap().pop_front() {
                    return Ok(envelope);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    struct RecordingWriter {
        sent: Arc<StdMutex<Vec<Envelope>>>,
    }

    #[async_trait]
    impl EnvelopeWriter for RecordingWriter {
        async fn write(&mut self, envelope: Envelope) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    #[tokio::test]
    async fn reader_pump_feeds_sink_in_order() {
        let rpc = Arc::new(RpcHandle::new(|_, _| {}));
        rpc.initialize();
        rpc.state().set_state(RpcState::Executing);

        let incoming = Arc::new(StdMutex::new(VecDeque::from([
            Envelope::new("a", Bytes::from_static(b"1")),
            Envelope::new("b", Bytes::from_static(b"2")),
        ])));
        let reader: SharedReader = Arc::new(AsyncMutex::new(Box::new(ChannelReader {
            queue: Arc::clone(&incoming),
        })));
        let sink = Arc::new(Sink::new());
        let queue = CompletionQueue::new();
        let mut executor = crate::completion_queue::CompletionQueueExecutor::start(&queue, 2);

        let _pump = ReaderPump::start(Arc::clone(&rpc), queue, reader, Arc::clone(&sink), CancellationToken::new());

        let first = sink.get(Duration::from_millis(200)).await.unwrap();
        sink.pop();
        let second = sink.get(Duration::from_millis(200)).await.unwrap();
        sink.pop();
        assert_eq!(first.type_url, "a");
        assert_eq!(second.type_url, "b");
        executor.stop();
    }

    #[tokio::test]
    async fn writer_pump_drains_sink_in_order() {
        let rpc = Arc::new(RpcHandle::new(|_, _| {}));
        rpc.initialize();
        rpc.state().set_state(RpcState::Executing);

        let sent = Arc::new(StdMutex::new(Vec::new()));
        let writer: SharedWriter = Arc::new(AsyncMutex::new(Box::new(RecordingWriter { sent: Arc::clone(&sent) })));
        let sink = Arc::new(Sink::new());
        sink.put(Envelope::new("a", Bytes::from_static(b"1"))).unwrap();
        sink.put(Envelope::new("b", Bytes::from_static(b"2"))).unwrap();

        let queue = CompletionQueue::new();
        let mut executor = crate::completion_queue::CompletionQueueExecutor::start(&queue, 2);
        let _pump = WriterPump::start(Arc::clone(&rpc), queue, writer, Arc::clone(&sink), CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].type_url, "a");
        assert_eq!(sent[1].type_url, "b");
        assert!(sink.is_empty());
        executor.stop();
    }

    #[tokio::test]
    async fn cancelling_the_token_unblocks_a_pending_read() {
        let rpc = Arc::new(RpcHandle::new(|_, _| {}));
        rpc.initialize();
        rpc.state().set_state(RpcState::Executing);

        // A reader that never produces a message: the only way out is cancellation.
        struct StalledReader;
        #[async_trait]
        impl EnvelopeReader for StalledReader {
            async fn read(&mut self) -> Result<Envelope, TransportError> {
                std::future::pending().await
            }
        }

        let reader: SharedReader = Arc::new(AsyncMutex::new(Box::new(StalledReader)));
        let sink = Arc::new(Sink::new());
        let queue = CompletionQueue::new();
        let mut executor = crate::completion_queue::CompletionQueueExecutor::start(&queue, 1);
        let cancel = CancellationToken::new();

        let _pump = ReaderPump::start(Arc::clone(&rpc), queue, reader, Arc::clone(&sink), cancel.clone());
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(200), async {
            loop {
                if rpc.state().get_state() == RpcState::Inactive {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cancellation should drive the call inactive promptly");

        executor.stop();
    }
}
