//! The seam between the RPC engine (`rpc-core`) and whatever actually moves bytes.
//!
//! treats the connection-factory registry and its HTTP/2-based wire protocol
//! as an external collaborator and specifies only the interface it exposes. This crate
//! is that interface (`ConnectionFactory`, `TransportChannel`, `TransportAcceptor`)
//! together with exactly one concrete, testable technology: `tcp`.

mod config;
pub mod tcp;

pub use config::{NetworkConfig, DEFAULT_WORKER_THREADS};

use async_trait::async_trait;
use rpc_envelope::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] rpc_envelope::CodecError),
    #[error("peer closed the stream")]
    Closed,
    #[error("address already in use")]
    AddrInUse,
}

/// The read half of an established channel. Exactly one `read` may be outstanding at a
/// time per the engine's reader-pump contract; this trait does not enforce that itself.
#[async_trait]
pub trait EnvelopeReader: Send {
    async fn read(&mut self) -> Result<Envelope, TransportError>;
}

/// The write half of an established channel.
#[async_trait]
pub trait EnvelopeWriter: Send {
    async fn write(&mut self, envelope: Envelope) -> Result<(), TransportError>;
}

pub type BoxedReader = Box<dyn EnvelopeReader>;
pub type BoxedWriter = Box<dyn EnvelopeWriter>;

/// An established, full-duplex channel, split into independent halves so the reader
/// pump and writer pump can each own one without contending on the other's progress.
pub trait TransportChannel: Send {
    fn split(self: Box<Self>) -> (BoxedReader, BoxedWriter);
}

/// Accepts inbound channels on a bound listening endpoint.
#[async_trait]
pub trait TransportAcceptor: Send {
    async fn accept(&mut self) -> Result<Box<dyn TransportChannel>, TransportError>;
}

/// Dials or binds channels for one technology, keyed by `NetworkConfig::technology_tag`.
///
/// A `ConnectionManager` (in `rpc-core`) holds a registry of these and matches a
/// config's `technology_tag` against each factory's own tag; the longest/most-specific
/// match wins
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// The tag this factory answers to, e.g. `"tcp"`.
    fn technology_tag(&self) -> &str;

    async fn connect(&self, cfg: &NetworkConfig) -> Result<Box<dyn TransportChannel>, TransportError>;

    async fn bind(&self, cfg: &NetworkConfig) -> Result<Box<dyn TransportAcceptor>, TransportError>;
}
