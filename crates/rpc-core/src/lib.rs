//! A bidirectional, length-delimited, self-describing-envelope RPC runtime: the
//! state machine and operation primitives (`state`, `operation`, `rpc`, `pump`,
//! `completion_queue`, `sink`) that a single call is built from, the two call shapes
//! built on top of them (`outgoing`, `incoming`), the connection-lifecycle types layered
//! over those (`client_manager`, `server`, `publisher`), and the public facade
//! (`api`, `connection_manager`) applications actually hold onto.

mod api;
mod client_manager;
mod completion_queue;
mod connection_manager;
mod incoming;
mod operation;
mod outgoing;
mod publisher;
mod pump;
mod rpc;
mod server;
mod sink;
mod state;

pub use api::{Client, CreateError, DecodeError, MessageHandler, Publisher, Reader, Server, Subscriber, TypedMessage, Writer};
pub use connection_manager::ConnectionManager;
pub use rpc::FinishStatus;
pub use server::ClientHandler;
pub use sink::Drained;
pub use state::RpcState;

pub use rpc_envelope::{CodecError, Envelope};
pub use rpc_transport::{
    BoxedReader, BoxedWriter, ConnectionFactory, EnvelopeReader, EnvelopeWriter, NetworkConfig, TransportAcceptor,
    TransportChannel, TransportError, DEFAULT_WORKER_THREADS,
};
