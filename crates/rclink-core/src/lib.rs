//! rclink-core: constants, configuration and error types shared by the
//! rclink crates.

pub mod config;
pub mod error;
pub mod types;

pub use error::{LinkError, LinkResult};
pub use types::Role;

/// Size of one file-transfer chunk before encryption (256 KiB)
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Default TCP port for the server role
pub const DEFAULT_PORT: u16 = 8765;

/// Number of chunks needed to carry `size` bytes.
///
/// An empty file has zero chunks: only `FileStart` and `FileEnd` are sent.
pub fn total_chunks(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64)
}
