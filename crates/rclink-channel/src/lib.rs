//! rclink-channel: encrypted peer channel on top of an ordered message transport
//!
//! Layers, bottom-up:
//!   - `transport`: opaque message delivery (TCP with length prefixes, or in-memory)
//!   - `frame`: JSON records tagged by `type`, binary fields in base64
//!   - `channel`: DH handshake state machine and payload encryption
//!   - `transfer`: chunked file sender and receiver
//!   - `session`: per-connection driver with handshake and idle timeouts
//!
//! ```text
//! responder                         initiator
//!   Init ── dh_init{y_s} ─────────────▶ Init
//!   AwaitingPeerKey ◀── dh_response{y_c} ── Ready
//!   Ready
//!         ◀── message / file_start / file_chunk* / file_end ──
//! ```

pub mod channel;
pub mod error;
pub mod frame;
pub mod session;
pub mod transfer;
pub mod transport;

pub use channel::{ChannelEvent, ChannelState, SecureChannel};
pub use error::ChannelError;
pub use frame::Frame;
pub use session::{Session, SessionConfig, SessionEvent};
pub use transfer::{CompletedTransfer, OutgoingTransfer, ProgressFn, TransferReceiver};
pub use transport::{MemoryTransport, TcpTransport, Transport};
