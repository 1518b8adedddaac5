//! A plain-TCP reference technology: envelopes framed with `EnvelopeCodec` over a
//! `tokio::net::TcpStream`. Registered under the technology tag `"tcp"`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rpc_envelope::{Envelope, EnvelopeCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::{
    BoxedReader, BoxedWriter, ConnectionFactory, EnvelopeReader, EnvelopeWriter, NetworkConfig,
    TransportAcceptor, TransportChannel, TransportError,
};

type FramedTcp = Framed<TcpStream, EnvelopeCodec>;

pub struct TcpChannel {
    framed: FramedTcp,
}

impl TransportChannel for TcpChannel {
    fn split(self: Box<Self>) -> (BoxedReader, BoxedWriter) {
        let (sink, stream) = self.framed.split();
        (Box::new(TcpReader { stream }), Box::new(TcpWriter { sink }))
    }
}

struct TcpReader {
    stream: futures_util::stream::SplitStream<FramedTcp>,
}

#[async_trait]
impl EnvelopeReader for TcpReader {
    async fn read(&mut self) -> Result<Envelope, TransportError> {
        match self.stream.next().await {
            Some(Ok(envelope)) => Ok(envelope),
            Some(Err(err)) => Err(err.into()),
            None => Err(TransportError::Closed),
        }
    }
}

struct TcpWriter {
    sink: futures_util::stream::SplitSink<FramedTcp, Envelope>,
}

#[async_trait]
impl EnvelopeWriter for TcpWriter {
    async fn write(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        self.sink.send(envelope).await.map_err(Into::into)
    }
}

pub struct TcpAcceptor {
    listener: TcpListener,
}

#[async_trait]
impl TransportAcceptor for TcpAcceptor {
    async fn accept(&mut self) -> Result<Box<dyn TransportChannel>, TransportError> {
        let (stream, _peer) = self.listener.accept().await?;
        stream.set_nodelay(true).ok();
        let framed = Framed::new(stream, EnvelopeCodec::new());
        Ok(Box::new(TcpChannel { framed }))
    }
}

/// The one concrete `ConnectionFactory` this workspace ships: dials or binds plain TCP
/// sockets and frames every frame with `EnvelopeCodec`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnectionFactory;

impl TcpConnectionFactory {
    pub const TECHNOLOGY_TAG: &'static str = "tcp";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    fn technology_tag(&self) -> &str {
        Self::TECHNOLOGY_TAG
    }

    async fn connect(&self, cfg: &NetworkConfig) -> Result<Box<dyn TransportChannel>, TransportError> {
        let stream = TcpStream::connect(cfg.addr()).await?;
        stream.set_nodelay(true).ok();
        let framed = Framed::new(stream, EnvelopeCodec::new());
        Ok(Box::new(TcpChannel { framed }))
    }

    async fn bind(&self, cfg: &NetworkConfig) -> Result<Box<dyn TransportAcceptor>, TransportError> {
        let listener = TcpListener::bind(cfg.addr())
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::AddrInUse => TransportError::AddrInUse,
                _ => TransportError::Io(err),
            })?;
        Ok(Box::new(TcpAcceptor { listener }))
    }
}
