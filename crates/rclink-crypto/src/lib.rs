//! rclink-crypto: primitives behind the rclink secure channel
//!
//! Key agreement and cipher pipeline:
//! ```text
//! DH keypair (x, g^x mod p), p = RFC 3526 2048-bit MODP prime, g = 2
//!   └── shared secret (peer^x mod p, 256 bytes big-endian)
//!       └── HKDF-SHA256 (salt = none, info = "handshake data") → 16-byte key
//!           └── RC6-32/20 key schedule → 44 round keys
//!               └── per-payload: pad to 16 → encrypt each block
//! ```
//!
//! There is no MAC. Tampering is only caught when it breaks the padding of the
//! final block, and the handshake is unauthenticated.

pub mod cipher;
pub mod dh;
pub mod error;
pub mod keys;
pub mod padding;

pub use cipher::{BlockCipher, RoundKeys};
pub use dh::{DhGroup, KeyAgreement};
pub use error::CryptoError;
pub use keys::SymmetricKey;
pub use padding::{pad, unpad};

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Cipher word size in bits
pub const WORD_BITS: u32 = 32;

/// Number of cipher rounds
pub const ROUNDS: usize = 20;

/// Length of the channel key derived from the DH shared secret
pub const KEY_SIZE: usize = 16;

/// DH modulus size in bytes; public values travel at this fixed width
pub const DH_MODULUS_BYTES: usize = 256;
