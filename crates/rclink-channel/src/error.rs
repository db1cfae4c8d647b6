//! Channel-level errors.
//!
//! Validation failures (bad padding, stray chunks, a second `file_start`) are
//! recoverable: the session logs them and keeps reading. Everything that
//! leaves no secure or consistent state to continue from is fatal.

use std::{io, time::Duration};

use rclink_crypto::CryptoError;
use thiserror::Error;

use crate::channel::ChannelState;

#[derive(Error, Debug)]
pub enum ChannelError {
    /// Crypto operation attempted before the handshake completed
    #[error("channel not ready: state is {state:?}")]
    NotReady { state: ChannelState },

    /// `file_start` received while another transfer is open
    #[error("transfer already in progress: {active}")]
    TransferInProgress { active: String },

    /// `file_chunk` or `file_end` received with no open transfer
    #[error("no transfer in progress")]
    NoActiveTransfer,

    #[error("chunk {chunk_id} out of range (transfer has {total_chunks} chunks)")]
    ChunkOutOfRange { chunk_id: u64, total_chunks: u64 },

    #[error("chunk {chunk_id} decrypts to {len} bytes, more than one chunk")]
    ChunkOversized { chunk_id: u64, len: usize },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Undecodable or semantically invalid frame
    #[error("frame error: {0}")]
    Frame(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout { elapsed: Duration },

    #[error("idle timeout after {elapsed:?}")]
    IdleTimeout { elapsed: Duration },

    #[error("peer closed the connection")]
    PeerClosed,
}

impl ChannelError {
    /// Whether the connection must be torn down.
    ///
    /// A rejected DH value is fatal because no key exists to continue with;
    /// transport and filesystem failures are fatal because the transfer
    /// state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Crypto(CryptoError::InvalidPeerKey)
                | Self::Transport(_)
                | Self::Io(_)
                | Self::HandshakeTimeout { .. }
                | Self::IdleTimeout { .. }
                | Self::PeerClosed
        )
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Frame(err.to_string())
    }
}
