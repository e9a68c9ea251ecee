//! In-memory transport for exercising client and server without sockets.

use crate::{
    QuicConnectionAdapter, QuicServerAdapter, QuicServerConnectionAdapter, QuicStreamAdapter,
    RpcClient, RpcConfig, RpcError, RpcServer,
};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub(crate) fn test_config() -> RpcConfig {
    RpcConfig::new("certs/cert.pem", "127.0.0.1:0")
        .with_key_path("certs/key.pem")
        .with_server_name("localhost")
}

/// Spawns `server` behind an in-memory endpoint and returns a client wired to it.
pub(crate) fn connect_in_memory(mut server: RpcServer) -> RpcClient {
    let (streams_tx, streams_rx) = mpsc::unbounded_channel();
    let mut endpoint = MemoryServer {
        connection: Some(MemoryServerConnection { streams: streams_rx }),
    };

    tokio::spawn(async move { server.start_with_adapter(&mut endpoint).await });

    RpcClient::with_connection(
        Box::new(MemoryConnection { streams: streams_tx }),
        &test_config(),
    )
}

/// Two connected stream ends; bytes sent on one arrive on the other.
pub(crate) fn stream_pair() -> (
    Box<dyn QuicStreamAdapter + Send>,
    Box<dyn QuicStreamAdapter + Send>,
) {
    let (local, remote) = MemoryStream::pair();
    (Box::new(local), Box::new(remote))
}

struct MemoryStream {
    outgoing: mpsc::UnboundedSender<Bytes>,
    incoming: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryStream {
    fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: a_tx,
                incoming: b_rx,
            },
            Self {
                outgoing: b_tx,
                incoming: a_rx,
            },
        )
    }
}

#[async_trait]
impl QuicStreamAdapter for MemoryStream {
    async fn send_bytes(&mut self, data: Bytes) -> Result<(), RpcError> {
        self.outgoing
            .send(data)
            .map_err(|_| RpcError::StreamError("peer closed the stream".into()))
    }

    async fn receive_bytes(&mut self) -> Result<Option<Bytes>, RpcError> {
        Ok(self.incoming.recv().await)
    }
}

struct MemoryConnection {
    streams: mpsc::UnboundedSender<MemoryStream>,
}

#[async_trait]
impl QuicConnectionAdapter for MemoryConnection {
    async fn open_bidirectional_stream(
        &mut self,
    ) -> Result<Box<dyn QuicStreamAdapter + Send>, RpcError> {
        let (local, remote) = MemoryStream::pair();
        self.streams
            .send(remote)
            .map_err(|_| RpcError::ConnectionError("server endpoint is gone".into()))?;
        Ok(Box::new(local))
    }
}

struct MemoryServerConnection {
    streams: mpsc::UnboundedReceiver<MemoryStream>,
}

#[async_trait]
impl QuicServerConnectionAdapter for MemoryServerConnection {
    async fn accept_bidirectional_stream(
        &mut self,
    ) -> Result<Option<Box<dyn QuicStreamAdapter + Send>>, RpcError> {
        Ok(self
            .streams
            .recv()
            .await
            .map(|stream| Box::new(stream) as Box<dyn QuicStreamAdapter + Send>))
    }
}

/// Hands out a single connection, then reports the endpoint as closed.
struct MemoryServer {
    connection: Option<MemoryServerConnection>,
}

#[async_trait]
impl QuicServerAdapter for MemoryServer {
    async fn accept(&mut self) -> Option<Box<dyn QuicServerConnectionAdapter>> {
        self.connection
            .take()
            .map(|connection| Box::new(connection) as Box<dyn QuicServerConnectionAdapter>)
    }
}
