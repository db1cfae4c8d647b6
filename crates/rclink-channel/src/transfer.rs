//! Chunked file transfer.
//!
//! A file travels as `file_start`, one `file_chunk` per 256 KiB slice and
//! `file_end`. Every chunk is padded and encrypted on its own, so the
//! receiver can open chunks in any order and write each at
//! `chunk_id * CHUNK_SIZE`.
//!
//! The receiver keeps two sinks per transfer: the reconstructed plaintext
//! `<dir>/<name>` and the concatenated ciphertext `<dir>/<name>(encrypted)`.

use std::collections::HashSet;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use rclink_core::CHUNK_SIZE;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::channel::SecureChannel;
use crate::error::ChannelError;
use crate::frame::Frame;

/// Progress callback type (bytes_done, bytes_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Suffix appended to the received filename for the ciphertext sink
pub const RAW_SUFFIX: &str = "(encrypted)";

/// Sender side of one file transfer.
#[derive(Debug)]
pub struct OutgoingTransfer {
    file: File,
    path: PathBuf,
    filename: String,
    size: u64,
    total_chunks: u64,
    next_chunk: u64,
    bytes_sent: u64,
}

impl OutgoingTransfer {
    /// Open `path` for sending. Only the final path component is announced
    /// to the peer.
    pub async fn open(path: &Path) -> Result<Self, ChannelError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", path.display()),
                )
            })?;

        let file = File::open(path).await?;
        let size = file.metadata().await?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            filename,
            size,
            total_chunks: rclink_core::total_chunks(size),
            next_chunk: 0,
            bytes_sent: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Plaintext bytes read and sealed so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn start_frame(&self) -> Frame {
        Frame::FileStart {
            filename: self.filename.clone(),
            size: self.size,
            total_chunks: self.total_chunks,
        }
    }

    /// Read and seal the next chunk. `None` once every chunk was produced.
    pub async fn next_chunk(
        &mut self,
        channel: &SecureChannel,
    ) -> Result<Option<Frame>, ChannelError> {
        if self.next_chunk >= self.total_chunks {
            return Ok(None);
        }
        if !channel.is_ready() {
            return Err(ChannelError::NotReady {
                state: channel.state(),
            });
        }

        let mut buf = Vec::with_capacity(CHUNK_SIZE);
        (&mut self.file)
            .take(CHUNK_SIZE as u64)
            .read_to_end(&mut buf)
            .await?;
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} shrank while sending: chunk {} of {}",
                    self.path.display(),
                    self.next_chunk,
                    self.total_chunks
                ),
            )
            .into());
        }

        let frame = Frame::FileChunk {
            chunk_id: self.next_chunk,
            data: channel.encrypt_payload(&buf)?,
        };
        self.next_chunk += 1;
        self.bytes_sent += buf.len() as u64;
        Ok(Some(frame))
    }

    pub fn end_frame(&self) -> Frame {
        Frame::FileEnd {
            filename: self.filename.clone(),
        }
    }
}

/// Summary of a finished inbound transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub filename: String,
    /// Reconstructed plaintext
    pub path: PathBuf,
    /// Concatenated chunk ciphertexts in arrival order
    pub raw_path: PathBuf,
    /// Size declared in `file_start`
    pub size: u64,
    pub total_chunks: u64,
    pub chunks_received: u64,
    pub bytes_written: u64,
}

impl CompletedTransfer {
    pub fn is_complete(&self) -> bool {
        self.chunks_received == self.total_chunks && self.bytes_written == self.size
    }
}

/// State of the one inbound transfer a channel may have open.
#[derive(Debug)]
struct TransferSession {
    filename: String,
    path: PathBuf,
    raw_path: PathBuf,
    plain: File,
    raw: File,
    size: u64,
    total_chunks: u64,
    received: HashSet<u64>,
    bytes_written: u64,
}

impl TransferSession {
    async fn flush(&mut self) -> io::Result<()> {
        self.plain.flush().await?;
        self.raw.flush().await
    }
}

/// Receiver side: reconstructs inbound files under `output_dir`.
#[derive(Debug)]
pub struct TransferReceiver {
    output_dir: PathBuf,
    session: Option<TransferSession>,
}

impl TransferReceiver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            session: None,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Filename of the open transfer, if any.
    pub fn active(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.filename.as_str())
    }

    /// Chunk count declared by the open transfer's `file_start`.
    pub fn expected_chunks(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.total_chunks)
    }

    /// Distinct chunks stored for the open transfer.
    pub fn chunks_received(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.received.len() as u64)
    }

    /// Open a transfer session and its two sinks.
    ///
    /// Returns the plaintext destination path.
    pub async fn on_file_start(
        &mut self,
        filename: &str,
        size: u64,
        total_chunks: u64,
    ) -> Result<PathBuf, ChannelError> {
        if let Some(active) = self.active() {
            return Err(ChannelError::TransferInProgress {
                active: active.to_string(),
            });
        }

        let name = sanitize_filename(filename)?;
        let expected = rclink_core::total_chunks(size);
        if total_chunks != expected {
            warn!(
                filename = %name,
                size,
                total_chunks,
                expected,
                "declared chunk count does not match size"
            );
            return Err(ChannelError::Frame(format!(
                "{name}: {total_chunks} chunks declared for {size} bytes, expected {expected}"
            )));
        }

        fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(&name);
        let raw_path = self.output_dir.join(format!("{name}{RAW_SUFFIX}"));
        let plain = File::create(&path).await?;
        let raw = File::create(&raw_path).await?;

        info!(filename = %name, size, total_chunks, dest = %path.display(), "receiving file");
        self.session = Some(TransferSession {
            filename: name,
            path: path.clone(),
            raw_path,
            plain,
            raw,
            size,
            total_chunks,
            received: HashSet::new(),
            bytes_written: 0,
        });
        Ok(path)
    }

    /// Store one sealed chunk: append the ciphertext to the raw sink, then
    /// decrypt it and write the plaintext at its offset.
    ///
    /// Returns the number of distinct chunks received so far.
    pub async fn on_file_chunk(
        &mut self,
        channel: &SecureChannel,
        chunk_id: u64,
        data: &[u8],
    ) -> Result<u64, ChannelError> {
        let session = self.session.as_mut().ok_or(ChannelError::NoActiveTransfer)?;
        let offset = chunk_offset(chunk_id, session.total_chunks)?;

        session.raw.write_all(data).await?;

        let plaintext = channel.decrypt_payload(data)?;
        if plaintext.len() > CHUNK_SIZE {
            return Err(ChannelError::ChunkOversized {
                chunk_id,
                len: plaintext.len(),
            });
        }

        session.plain.seek(SeekFrom::Start(offset)).await?;
        session.plain.write_all(&plaintext).await?;

        if session.received.insert(chunk_id) {
            session.bytes_written += plaintext.len() as u64;
        } else {
            debug!(filename = %session.filename, chunk_id, "duplicate chunk rewritten");
        }

        debug!(
            filename = %session.filename,
            chunk_id,
            received = session.received.len(),
            total = session.total_chunks,
            "chunk stored"
        );
        Ok(session.received.len() as u64)
    }

    /// Flush and close both sinks and end the session.
    pub async fn on_file_end(&mut self, filename: &str) -> Result<CompletedTransfer, ChannelError> {
        let mut session = self.session.take().ok_or(ChannelError::NoActiveTransfer)?;

        if sanitize_filename(filename).ok().as_deref() != Some(session.filename.as_str()) {
            warn!(
                active = %session.filename,
                got = %filename,
                "file_end names a different file; closing active transfer"
            );
        }

        session.flush().await?;

        let done = CompletedTransfer {
            filename: session.filename,
            path: session.path,
            raw_path: session.raw_path,
            size: session.size,
            total_chunks: session.total_chunks,
            chunks_received: session.received.len() as u64,
            bytes_written: session.bytes_written,
        };
        if done.is_complete() {
            info!(filename = %done.filename, bytes = done.bytes_written, "file received");
        } else {
            warn!(
                filename = %done.filename,
                received = done.chunks_received,
                total = done.total_chunks,
                bytes = done.bytes_written,
                size = done.size,
                "file closed incomplete"
            );
        }
        Ok(done)
    }

    /// Close the open transfer without completing it. Partial files stay on
    /// disk.
    ///
    /// Returns the filename of the aborted transfer.
    pub async fn abort(&mut self) -> Option<String> {
        let mut session = self.session.take()?;
        if let Err(e) = session.flush().await {
            warn!(filename = %session.filename, error = %e, "flush failed while aborting transfer");
        }
        warn!(
            filename = %session.filename,
            received = session.received.len(),
            total = session.total_chunks,
            "transfer aborted, partial file left on disk"
        );
        Some(session.filename)
    }
}

/// Reduce a peer-supplied filename to its final path component.
fn sanitize_filename(filename: &str) -> Result<String, ChannelError> {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ChannelError::Frame(format!("unusable filename: {filename:?}")))
}

/// Byte offset of `chunk_id` in the plaintext file.
fn chunk_offset(chunk_id: u64, total_chunks: u64) -> Result<u64, ChannelError> {
    let out_of_range = ChannelError::ChunkOutOfRange {
        chunk_id,
        total_chunks,
    };
    if chunk_id >= total_chunks {
        return Err(out_of_range);
    }
    chunk_id.checked_mul(CHUNK_SIZE as u64).ok_or(out_of_range)
}
