//! Message transports.
//!
//! A transport delivers opaque byte messages in order. The channel layer
//! never sees stream boundaries: TCP is framed with a 4-byte big-endian
//! length prefix, the in-memory transport passes whole messages over a
//! bounded mpsc queue.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::ChannelError;

/// Largest accepted message. A sealed 256 KiB chunk is ~350 KiB once
/// base64-encoded in JSON.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Bidirectional ordered message transport.
#[async_trait]
pub trait Transport: Send {
    /// Send one message.
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError>;

    /// Next inbound message, or `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, ChannelError>>;

    /// Close our sending side. The peer's `recv` then yields `None`.
    async fn close(&mut self) -> Result<(), ChannelError>;

    /// Peer description for logs.
    fn peer_label(&self) -> String;
}

/// TCP stream framed with [`LengthDelimitedCodec`].
#[derive(Debug)]
pub struct TcpTransport {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    peer: String,
}

impl TcpTransport {
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec();

        Self {
            framed: Framed::new(stream, codec),
            peer,
        }
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ChannelError::Transport(format!("failed to connect: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError> {
        self.framed
            .send(Bytes::from(message))
            .await
            .map_err(|e| ChannelError::Transport(format!("send to {}: {e}", self.peer)))
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, ChannelError>> {
        let item = self.framed.next().await?;
        Some(
            item.map(|bytes| bytes.to_vec())
                .map_err(|e| ChannelError::Transport(format!("recv from {}: {e}", self.peer))),
        )
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        SinkExt::<Bytes>::close(&mut self.framed)
            .await
            .map_err(|e| ChannelError::Transport(format!("close {}: {e}", self.peer)))
    }

    fn peer_label(&self) -> String {
        self.peer.clone()
    }
}

/// One end of an in-process transport pair.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
    label: &'static str,
}

impl MemoryTransport {
    /// Two connected ends, each direction buffering up to `capacity`
    /// messages before `send` waits.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
                label: "memory:a",
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
                label: "memory:b",
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ChannelError::Transport("transport closed".into()))?;
        tx.send(message).await.map_err(|_| ChannelError::PeerClosed)
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, ChannelError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.tx = None;
        Ok(())
    }

    fn peer_label(&self) -> String {
        self.label.to_string()
    }
}
