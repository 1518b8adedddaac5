//! `ConnectionManager`: a registry of [`ConnectionFactory`]s matched by
//! `technology_tag`, and the single place `Client`/`Server`/`Publisher`/`Subscriber`
//! construction goes through when the caller names a technology instead of handing over
//! a factory directly.

use std::sync::Arc;

use rpc_transport::{ConnectionFactory, NetworkConfig};

use crate::api::{Client, CreateError, Publisher, Server, Subscriber};
use crate::server::ClientHandler;

/// Holds every registered [`ConnectionFactory`], keyed by the tag it answers to.
/// Resolution picks the registered tag that is both a prefix of the requested tag and
/// the longest such prefix, so e.g. a `"tcp"` factory still matches a `"tcp+tls"`
/// request if nothing more specific is registered.
pub struct ConnectionManager {
    factories: Vec<Arc<dyn ConnectionFactory>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self { factories: Vec::new() }
    }

    pub fn register(&mut self, factory: Arc<dyn ConnectionFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    fn resolve(&self, requested_tag: &str) -> Result<Arc<dyn ConnectionFactory>, CreateError> {
        self.factories
            .iter()
            .filter(|factory| requested_tag.starts_with(factory.technology_tag()))
            .max_by_key(|factory| factory.technology_tag().len())
            .cloned()
            .ok_or_else(|| CreateError::NoMatchingFactory(requested_tag.to_owned()))
    }

    pub fn create_client(&self, cfg: NetworkConfig) -> Result<Client, CreateError> {
        let factory = self.resolve(cfg.technology_tag())?;
        Ok(Client::new(factory, cfg))
    }

    pub async fn create_server(
        &self,
        cfg: NetworkConfig,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Server, CreateError> {
        let factory = self.resolve(cfg.technology_tag())?;
        Server::bind(factory, cfg, handler).await
    }

    pub async fn create_publisher(&self, cfg: NetworkConfig) -> Result<Publisher, CreateError> {
        let factory = self.resolve(cfg.technology_tag())?;
        Publisher::bind(factory, cfg).await
    }

    pub fn create_subscriber(&self, cfg: NetworkConfig) -> Result<Subscriber, CreateError> {
        let factory = self.resolve(cfg.technology_tag())?;
        Ok(Subscriber::new(factory, cfg))
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_transport::tcp::TcpConnectionFactory;

    #[test]
    fn resolves_the_longest_matching_prefix() {
        let mut manager = ConnectionManager::new();
        manager.register(Arc::new(TcpConnectionFactory::new()));

        let port = portpicker::pick_unused_port().expect("a free port");
        let cfg = NetworkConfig::new("127.0.0.1", port, "tcp");
        assert!(manager.create_client(cfg).is_ok());
    }

    #[test]
    fn an_unregistered_tag_fails_to_resolve() {
        let manager = ConnectionManager::new();
        let port = portpicker::pick_unused_port().expect("a free port");
        let cfg = NetworkConfig::new("127.0.0.1", port, "quic");
        assert!(matches!(
            manager.create_client(cfg),
            Err(CreateError::NoMatchingFactory(tag)) if tag == "quic"
        ));
    }
}
