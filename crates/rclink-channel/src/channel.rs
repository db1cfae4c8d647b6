//! Secure channel state machine.
//!
//! Pure: no I/O. [`SecureChannel::handle_frame`] consumes one inbound frame
//! and returns the events the driver must act on (frames to send, decrypted
//! messages, transfer records).
//!
//! ```text
//! responder:  Init ──start()──▶ AwaitingPeerKey ──dh_response──▶ Ready
//! initiator:  Init ──dh_init (reply dh_response)──────────────▶ Ready
//!             any ──close() / fatal error──▶ Closed
//! ```

use rclink_core::Role;
use rclink_crypto::{BlockCipher, KeyAgreement};
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No key material yet
    Init,
    /// Responder sent `dh_init`, waiting for `dh_response`
    AwaitingPeerKey,
    /// Shared key derived; payloads can be sealed and opened
    Ready,
    Closed,
}

/// Actions returned by [`SecureChannel::handle_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Send this frame to the peer
    Send(Frame),
    /// Handshake finished on this side
    Established,
    /// Decrypted message payload
    Message(Vec<u8>),
    FileStart {
        filename: String,
        size: u64,
        total_chunks: u64,
    },
    /// Chunk ciphertext, still sealed; the receiver opens it
    FileChunk { chunk_id: u64, data: Vec<u8> },
    FileEnd { filename: String },
    /// Frame dropped because it does not fit the current state
    Discarded { kind: &'static str },
}

/// One end of an encrypted link.
#[derive(Debug)]
pub struct SecureChannel {
    role: Role,
    state: ChannelState,
    /// Held only between keypair generation and key derivation
    keys: Option<KeyAgreement>,
    cipher: Option<BlockCipher>,
}

impl SecureChannel {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: ChannelState::Init,
            keys: None,
            cipher: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ChannelState::Ready
    }

    /// Open the handshake.
    ///
    /// The responder generates its keypair and returns the `dh_init` frame to
    /// send. The initiator waits for the peer and returns `None`, as does a
    /// responder that already started.
    pub fn start(&mut self) -> Option<Frame> {
        if self.role != Role::Responder || self.state != ChannelState::Init {
            return None;
        }

        let keys = KeyAgreement::generate();
        let frame = Frame::DhInit {
            public_key: keys.public_bytes().to_vec(),
        };
        self.keys = Some(keys);
        self.state = ChannelState::AwaitingPeerKey;
        debug!(role = %self.role, "sent DH public value");
        Some(frame)
    }

    /// Process one inbound frame.
    ///
    /// # Errors
    ///
    /// - `Crypto(InvalidPeerKey)` when the peer's DH value is rejected; the
    ///   channel is closed before returning
    /// - `Crypto(..)` when a message fails to decrypt (channel stays open)
    pub fn handle_frame(&mut self, frame: Frame) -> Result<Vec<ChannelEvent>, ChannelError> {
        match frame {
            Frame::DhInit { public_key } => self.on_dh_init(&public_key),
            Frame::DhResponse { public_key } => self.on_dh_response(&public_key),
            other if !self.is_ready() => Ok(vec![self.discard(&other)]),
            Frame::Message { data } => Ok(vec![ChannelEvent::Message(self.decrypt_payload(&data)?)]),
            Frame::FileStart {
                filename,
                size,
                total_chunks,
            } => Ok(vec![ChannelEvent::FileStart {
                filename,
                size,
                total_chunks,
            }]),
            Frame::FileChunk { chunk_id, data } => {
                Ok(vec![ChannelEvent::FileChunk { chunk_id, data }])
            }
            Frame::FileEnd { filename } => Ok(vec![ChannelEvent::FileEnd { filename }]),
        }
    }

    fn on_dh_init(&mut self, peer_key: &[u8]) -> Result<Vec<ChannelEvent>, ChannelError> {
        if self.role != Role::Initiator || self.state != ChannelState::Init {
            return Ok(vec![self.discard_kind("dh_init")]);
        }

        let keys = KeyAgreement::generate();
        self.establish(&keys, peer_key)?;

        Ok(vec![
            ChannelEvent::Send(Frame::DhResponse {
                public_key: keys.public_bytes().to_vec(),
            }),
            ChannelEvent::Established,
        ])
    }

    fn on_dh_response(&mut self, peer_key: &[u8]) -> Result<Vec<ChannelEvent>, ChannelError> {
        if self.role != Role::Responder || self.state != ChannelState::AwaitingPeerKey {
            return Ok(vec![self.discard_kind("dh_response")]);
        }
        let Some(keys) = self.keys.take() else {
            return Ok(vec![self.discard_kind("dh_response")]);
        };

        self.establish(&keys, peer_key)?;
        Ok(vec![ChannelEvent::Established])
    }

    /// Derive the channel key from our keypair and the peer's public value.
    fn establish(&mut self, keys: &KeyAgreement, peer_key: &[u8]) -> Result<(), ChannelError> {
        let derived = KeyAgreement::parse_public(peer_key)
            .and_then(|peer| keys.derive_shared_key(&peer));

        match derived {
            Ok(key) => {
                self.cipher = Some(BlockCipher::from_key(&key));
                self.keys = None;
                self.state = ChannelState::Ready;
                info!(role = %self.role, "secure channel established");
                Ok(())
            }
            Err(e) => {
                warn!(role = %self.role, error = %e, "peer DH value rejected, closing channel");
                self.close();
                Err(e.into())
            }
        }
    }

    fn discard(&self, frame: &Frame) -> ChannelEvent {
        self.discard_kind(frame.kind())
    }

    fn discard_kind(&self, kind: &'static str) -> ChannelEvent {
        warn!(role = %self.role, state = ?self.state, kind, "discarding frame");
        ChannelEvent::Discarded { kind }
    }

    fn cipher(&self) -> Result<&BlockCipher, ChannelError> {
        match (&self.cipher, self.state) {
            (Some(cipher), ChannelState::Ready) => Ok(cipher),
            _ => Err(ChannelError::NotReady { state: self.state }),
        }
    }

    /// Pad and encrypt `plaintext` under the channel key.
    pub fn encrypt_payload(&self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        Ok(self.cipher()?.encrypt(plaintext))
    }

    /// Decrypt and unpad a payload sealed by the peer.
    pub fn decrypt_payload(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        Ok(self.cipher()?.decrypt(ciphertext)?)
    }

    /// Build an encrypted `message` frame.
    pub fn seal_message(&self, text: &str) -> Result<Frame, ChannelError> {
        Ok(Frame::Message {
            data: self.encrypt_payload(text.as_bytes())?,
        })
    }

    /// Release key material and refuse further payloads. Idempotent.
    pub fn close(&mut self) {
        if self.state != ChannelState::Closed {
            debug!(role = %self.role, from = ?self.state, "closing channel");
        }
        self.keys = None;
        self.cipher = None;
        self.state = ChannelState::Closed;
    }
}
