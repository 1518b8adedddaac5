//! `PublisherClientHandler`: the `ClientHandler` a `Publisher` installs
//! on its `ServerCore`. Keeps every still-running subscriber and fans outgoing envelopes
//! out to all of them.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use rpc_envelope::Envelope;

use crate::api::Client;
use crate::server::ClientHandler;

struct Inner {
    subscribers: Vec<Client>,
}

/// Holds the `(client, writer)` pairs from publisher description — here
/// just `Client`, since `Client::write_envelope` already reaches its `WriterSink`.
pub struct PublisherClientHandler {
    inner: SyncMutex<Inner>,
}

impl PublisherClientHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SyncMutex::new(Inner { subscribers: Vec::new() }),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Fans `envelope` out to every subscriber. A subscriber whose `WriterSink` rejects
    /// the write (already drained, call no longer running) is stopped and pruned —
    /// §4.13's "a dead subscriber is removed rather than left to accumulate
    /// undeliverable envelopes."
    pub async fn send(&self, envelope: Envelope) {
        let current: Vec<Client> = self.inner.lock().subscribers.clone();

        let mut dead = Vec::new();
        for client in &current {
            if !client.is_running() || client.write_envelope(envelope.clone()).is_err() {
                dead.push(client.clone());
            }
        }

        if dead.is_empty() {
            return;
        }

        for client in &dead {
            client.stop().await;
        }

        let mut inner = self.inner.lock();
        inner.subscribers.retain(|client| !dead.iter().any(|d| d.same_call(client)));
    }

    /// Stops and releases every subscriber, per `Publisher::stop()`.
    pub async fn release_clients(&self) {
        let subscribers = std::mem::take(&mut self.inner.lock().subscribers);
        for client in subscribers {
            client.stop().await;
        }
    }
}

#[async_trait]
impl ClientHandler for PublisherClientHandler {
    /// Every accepted client becomes a subscriber and is kept open (`keep_alive = true`)
    /// until it dies or `release_clients` tears it down.
    async fn handle(&self, client: Client, keep_alive: &mut bool) -> bool {
        *keep_alive = true;
        self.inner.lock().subscribers.push(client);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rpc_transport::tcp::TcpConnectionFactory;
    use rpc_transport::{ConnectionFactory, NetworkConfig};
    use std::time::Duration;

    use crate::server::ServerCore;

    #[tokio::test]
    async fn fans_an_envelope_out_to_every_connected_subscriber() {
        let port = portpicker::pick_unused_port().expect("a free port");
        let cfg = NetworkConfig::new("127.0.0.1", port, TcpConnectionFactory::TECHNOLOGY_TAG);
        let factory: Arc<dyn ConnectionFactory> = Arc::new(TcpConnectionFactory::new());

        let handler = PublisherClientHandler::new();
        let server = ServerCore::bind(Arc::clone(&factory), cfg.clone(), Arc::clone(&handler) as Arc<dyn ClientHandler>)
            .await
            .expect("bind succeeds");

        let subscriber_a = crate::api::Client::new(Arc::clone(&factory), cfg.clone());
        let subscriber_b = crate::api::Client::new(Arc::clone(&factory), cfg.clone());
        assert!(subscriber_a.start().await);
        assert!(subscriber_b.start().await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.subscriber_count(), 2);

        handler
            .send(Envelope::new("greeting", Bytes::from_static(b"hello")))
            .await;

        let received_a = subscriber_a.read_envelope(Duration::from_millis(500)).await;
        let received_b = subscriber_b.read_envelope(Duration::from_millis(500)).await;
        assert_eq!(received_a.unwrap().type_url, "greeting");
        assert_eq!(received_b.unwrap().type_url, "greeting");

        subscriber_a.stop().await;
        subscriber_b.stop().await;
        server.stop().await;
    }
}
