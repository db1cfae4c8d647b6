use thiserror::Error;

/// Validation failures raised by the primitives.
///
/// These are expected outcomes of handling untrusted input, not internal faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("peer DH public value is outside [2, p-2]")]
    InvalidPeerKey,

    #[error("block must be {} bytes, got {len}", crate::BLOCK_SIZE)]
    InvalidBlockLength { len: usize },

    #[error("ciphertext length {len} is not a positive multiple of {}", crate::BLOCK_SIZE)]
    InvalidCiphertextLength { len: usize },

    #[error("invalid padding")]
    InvalidPadding,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}
