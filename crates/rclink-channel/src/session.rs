//! Per-connection driver.
//!
//! A [`Session`] owns one transport, one [`SecureChannel`] and one
//! [`TransferReceiver`], and feeds inbound frames through them strictly in
//! arrival order. Recoverable errors are logged at the frame boundary; fatal
//! ones abort any open transfer, close the channel and the transport.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rclink_core::config::LinkConfig;
use rclink_core::Role;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelState, SecureChannel};
use crate::error::ChannelError;
use crate::frame::Frame;
use crate::transfer::{CompletedTransfer, OutgoingTransfer, ProgressFn, TransferReceiver};
use crate::transport::Transport;

/// Timeouts and output location for one connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Limit on `Init`/`AwaitingPeerKey` (None = wait forever)
    pub handshake_timeout: Option<Duration>,
    /// Limit between inbound frames once ready (None = wait forever)
    pub idle_timeout: Option<Duration>,
    /// Where received files are written
    pub output_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&LinkConfig::default())
    }
}

impl From<&LinkConfig> for SessionConfig {
    fn from(config: &LinkConfig) -> Self {
        Self {
            handshake_timeout: config.channel.handshake_timeout(),
            idle_timeout: config.channel.idle_timeout(),
            output_dir: config.transfer.output_dir.clone(),
        }
    }
}

/// What happened on a session, reported to the [`Session::run`] callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established,
    /// Decrypted text message (invalid UTF-8 replaced)
    Message(String),
    TransferStarted {
        filename: String,
        size: u64,
        total_chunks: u64,
        path: PathBuf,
    },
    ChunkReceived {
        chunk_id: u64,
        received: u64,
        total_chunks: u64,
    },
    TransferCompleted(CompletedTransfer),
    /// Connection ended with a transfer still open
    TransferAborted { filename: String },
}

pub struct Session<T: Transport> {
    transport: T,
    channel: SecureChannel,
    receiver: TransferReceiver,
    config: SessionConfig,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, role: Role, config: SessionConfig) -> Self {
        let receiver = TransferReceiver::new(&config.output_dir);
        Self {
            transport,
            channel: SecureChannel::new(role),
            receiver,
            config,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn channel(&self) -> &SecureChannel {
        &self.channel
    }

    pub fn receiver(&self) -> &TransferReceiver {
        &self.receiver
    }

    pub fn peer_label(&self) -> String {
        self.transport.peer_label()
    }

    /// Run the DH exchange until the channel is ready.
    ///
    /// Fails with `HandshakeTimeout` when the configured limit expires and
    /// with `PeerClosed` when the peer hangs up first. Any failure tears the
    /// session down.
    pub async fn handshake(&mut self) -> Result<(), ChannelError> {
        let result = match self.config.handshake_timeout {
            Some(limit) => timeout(limit, self.drive_handshake())
                .await
                .unwrap_or(Err(ChannelError::HandshakeTimeout { elapsed: limit })),
            None => self.drive_handshake().await,
        };

        if let Err(e) = &result {
            warn!(peer = %self.peer_label(), error = %e, "handshake failed");
            self.teardown().await;
        }
        result
    }

    async fn drive_handshake(&mut self) -> Result<(), ChannelError> {
        if let Some(init) = self.channel.start() {
            self.send_frame(&init).await?;
        }

        while !self.channel.is_ready() {
            let bytes = match self.transport.recv().await {
                Some(item) => item?,
                None => return Err(ChannelError::PeerClosed),
            };
            match self.process(&bytes, &mut |_: SessionEvent| {}).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(peer = %self.peer_label(), error = %e, "ignoring frame during handshake"),
            }
        }
        Ok(())
    }

    /// Receive and handle frames until the peer closes the connection.
    ///
    /// Completes the handshake first if needed. Returns `Ok(())` on orderly
    /// peer closure and the error on a fatal failure; the session is torn
    /// down either way.
    pub async fn run<F>(&mut self, mut on_event: F) -> Result<(), ChannelError>
    where
        F: FnMut(SessionEvent) + Send,
    {
        if !self.channel.is_ready() {
            self.handshake().await?;
            on_event(SessionEvent::Established);
        }

        let result = self.receive_loop(&mut on_event).await;
        match &result {
            Ok(()) => info!(peer = %self.peer_label(), "peer closed connection"),
            Err(e) => warn!(peer = %self.peer_label(), error = %e, "closing session"),
        }
        if let Some(filename) = self.teardown().await {
            on_event(SessionEvent::TransferAborted { filename });
        }
        result
    }

    async fn receive_loop<F>(&mut self, on_event: &mut F) -> Result<(), ChannelError>
    where
        F: FnMut(SessionEvent) + Send,
    {
        loop {
            let next = match self.config.idle_timeout {
                Some(limit) => match timeout(limit, self.transport.recv()).await {
                    Ok(next) => next,
                    Err(_) => return Err(ChannelError::IdleTimeout { elapsed: limit }),
                },
                None => self.transport.recv().await,
            };

            let bytes = match next {
                Some(item) => item?,
                None => return Ok(()),
            };

            match self.process(&bytes, on_event).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(peer = %self.peer_label(), error = %e, "frame rejected"),
            }
        }
    }

    /// Decode one inbound message and carry out the channel's events.
    async fn process<F>(&mut self, bytes: &[u8], on_event: &mut F) -> Result<(), ChannelError>
    where
        F: FnMut(SessionEvent) + Send,
    {
        let frame = Frame::from_bytes(bytes)?;
        debug!(kind = frame.kind(), len = bytes.len(), "frame received");

        for event in self.channel.handle_frame(frame)? {
            match event {
                ChannelEvent::Send(frame) => self.send_frame(&frame).await?,
                ChannelEvent::Established => on_event(SessionEvent::Established),
                ChannelEvent::Message(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    info!(peer = %self.peer_label(), len = text.len(), "message received");
                    on_event(SessionEvent::Message(text));
                }
                ChannelEvent::FileStart {
                    filename,
                    size,
                    total_chunks,
                } => {
                    let path = self
                        .receiver
                        .on_file_start(&filename, size, total_chunks)
                        .await?;
                    on_event(SessionEvent::TransferStarted {
                        filename,
                        size,
                        total_chunks,
                        path,
                    });
                }
                ChannelEvent::FileChunk { chunk_id, data } => {
                    let received = self
                        .receiver
                        .on_file_chunk(&self.channel, chunk_id, &data)
                        .await?;
                    on_event(SessionEvent::ChunkReceived {
                        chunk_id,
                        received,
                        total_chunks: self.receiver.expected_chunks().unwrap_or_default(),
                    });
                }
                ChannelEvent::FileEnd { filename } => {
                    let done = self.receiver.on_file_end(&filename).await?;
                    on_event(SessionEvent::TransferCompleted(done));
                }
                ChannelEvent::Discarded { .. } => {}
            }
        }
        Ok(())
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        let bytes = frame.to_bytes()?;
        debug!(kind = frame.kind(), len = bytes.len(), "sending frame");
        self.transport.send(bytes).await
    }

    /// Send a frame after the handshake; fatal failures tear down.
    async fn send_sealed(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        match self.send_frame(frame).await {
            Err(e) if e.is_fatal() => {
                warn!(peer = %self.peer_label(), error = %e, "send failed, closing session");
                self.teardown().await;
                Err(e)
            }
            other => other,
        }
    }

    /// Encrypt and send a text message.
    ///
    /// Fails with `NotReady` until the handshake has completed.
    pub async fn send_message(&mut self, text: &str) -> Result<(), ChannelError> {
        let frame = self.channel.seal_message(text)?;
        self.send_sealed(&frame).await?;
        info!(peer = %self.peer_label(), len = text.len(), "message sent");
        Ok(())
    }

    /// Stream a file to the peer as `file_start`, sealed chunks, `file_end`.
    ///
    /// Returns the number of plaintext bytes sent. A failure after
    /// `file_start` went out tears the session down.
    pub async fn send_file(
        &mut self,
        path: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<u64, ChannelError> {
        if !self.channel.is_ready() {
            return Err(ChannelError::NotReady {
                state: self.channel.state(),
            });
        }

        let mut outgoing = OutgoingTransfer::open(path).await?;
        info!(
            peer = %self.peer_label(),
            filename = %outgoing.filename(),
            size = outgoing.size(),
            total_chunks = outgoing.total_chunks(),
            "sending file"
        );

        self.send_sealed(&outgoing.start_frame()).await?;

        // The peer now holds an open transfer that only file_end or a
        // closed connection releases.
        if let Err(e) = self.stream_file(&mut outgoing, progress).await {
            if self.channel.state() != ChannelState::Closed {
                warn!(
                    peer = %self.peer_label(),
                    filename = %outgoing.filename(),
                    error = %e,
                    "transfer failed, closing session"
                );
                self.teardown().await;
            }
            return Err(e);
        }

        info!(filename = %outgoing.filename(), bytes = outgoing.bytes_sent(), "file sent");
        Ok(outgoing.bytes_sent())
    }

    async fn stream_file(
        &mut self,
        outgoing: &mut OutgoingTransfer,
        progress: Option<&ProgressFn>,
    ) -> Result<(), ChannelError> {
        while let Some(chunk) = outgoing.next_chunk(&self.channel).await? {
            self.send_sealed(&chunk).await?;
            if let Some(cb) = progress {
                cb(outgoing.bytes_sent(), outgoing.size(), outgoing.filename());
            }
        }
        self.send_sealed(&outgoing.end_frame()).await
    }

    /// Close the session from our side.
    pub async fn close(&mut self) {
        self.teardown().await;
    }

    /// Abort any open transfer, drop key material and close the transport.
    ///
    /// Returns the filename of an aborted transfer.
    async fn teardown(&mut self) -> Option<String> {
        let aborted = self.receiver.abort().await;
        self.channel.close();
        if let Err(e) = self.transport.close().await {
            debug!(peer = %self.peer_label(), error = %e, "transport close failed");
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn config(dir: &Path) -> SessionConfig {
        SessionConfig {
            handshake_timeout: Some(Duration::from_secs(5)),
            idle_timeout: None,
            output_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_config_from_link_config() {
        let mut link = LinkConfig::default();
        link.channel.idle_timeout_secs = 0;
        link.transfer.output_dir = PathBuf::from("/srv/inbox");

        let config = SessionConfig::from(&link);
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.output_dir, PathBuf::from("/srv/inbox"));
    }

    #[tokio::test]
    async fn test_handshake_over_memory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (a, b) = MemoryTransport::pair(8);
        let mut server = Session::new(a, Role::Responder, config(tmp.path()));
        let mut client = Session::new(b, Role::Initiator, config(tmp.path()));

        let (s, c) = tokio::join!(server.handshake(), client.handshake());
        s.unwrap();
        c.unwrap();
        assert_eq!(server.state(), ChannelState::Ready);
        assert_eq!(client.state(), ChannelState::Ready);
    }

    #[tokio::test]
    async fn test_send_before_handshake_is_not_ready() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (a, _b) = MemoryTransport::pair(8);
        let mut client = Session::new(a, Role::Initiator, config(tmp.path()));

        let err = client.send_message("too early").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotReady { state: ChannelState::Init }));

        let file = tmp.path().join("f.bin");
        tokio::fs::write(&file, b"data").await.unwrap();
        let err = client.send_file(&file, None).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotReady { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (a, _silent_peer) = MemoryTransport::pair(8);
        let mut client = Session::new(a, Role::Initiator, config(tmp.path()));

        let err = client.handshake().await.unwrap_err();
        assert!(matches!(err, ChannelError::HandshakeTimeout { .. }));
        assert_eq!(client.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_handshake_peer_closed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (a, b) = MemoryTransport::pair(8);
        drop(b);
        let mut client = Session::new(a, Role::Initiator, config(tmp.path()));

        let err = client.handshake().await.unwrap_err();
        assert!(matches!(err, ChannelError::PeerClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_session() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (a, b) = MemoryTransport::pair(8);
        let mut server_config = config(tmp.path());
        server_config.idle_timeout = Some(Duration::from_secs(60));
        let mut server = Session::new(a, Role::Responder, server_config);
        let mut client = Session::new(b, Role::Initiator, config(tmp.path()));

        let (s, c) = tokio::join!(server.handshake(), client.handshake());
        s.unwrap();
        c.unwrap();

        let mut events = Vec::new();
        let err = server.run(|e| events.push(e)).await.unwrap_err();
        assert!(matches!(err, ChannelError::IdleTimeout { .. }));
        assert_eq!(server.state(), ChannelState::Closed);
        assert!(events.is_empty());
    }
}
