//! Integration tests for chunked file transfer.
//!
//! Drives an `OutgoingTransfer` into a `TransferReceiver` through a pair of
//! handshaked channels and checks the reconstructed plaintext on disk.

use std::path::{Path, PathBuf};

use rclink_channel::{
    ChannelError, ChannelEvent, Frame, OutgoingTransfer, SecureChannel, TransferReceiver,
};
use rclink_core::{Role, CHUNK_SIZE};
use tempfile::TempDir;

fn ready_pair() -> (SecureChannel, SecureChannel) {
    let mut server = SecureChannel::new(Role::Responder);
    let mut client = SecureChannel::new(Role::Initiator);

    let init = server.start().expect("responder opens handshake");
    let events = client.handle_frame(init).unwrap();
    let response = events
        .into_iter()
        .find_map(|e| match e {
            ChannelEvent::Send(frame) => Some(frame),
            _ => None,
        })
        .expect("initiator answers with dh_response");
    server.handle_frame(response).unwrap();

    assert!(server.is_ready() && client.is_ready());
    (server, client)
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

/// Collect every frame the sender produces for `path`.
async fn sender_frames(path: &Path, channel: &SecureChannel) -> Vec<Frame> {
    let mut out = OutgoingTransfer::open(path).await.unwrap();
    let mut frames = vec![out.start_frame()];
    while let Some(chunk) = out.next_chunk(channel).await.unwrap() {
        frames.push(chunk);
    }
    frames.push(out.end_frame());
    frames
}

/// Feed sender frames into a receiver in the given order.
async fn deliver(
    frames: Vec<Frame>,
    rx: &mut TransferReceiver,
    channel: &SecureChannel,
) -> rclink_channel::CompletedTransfer {
    let mut done = None;
    for frame in frames {
        match frame {
            Frame::FileStart {
                filename,
                size,
                total_chunks,
            } => {
                rx.on_file_start(&filename, size, total_chunks).await.unwrap();
            }
            Frame::FileChunk { chunk_id, data } => {
                rx.on_file_chunk(channel, chunk_id, &data).await.unwrap();
            }
            Frame::FileEnd { filename } => {
                done = Some(rx.on_file_end(&filename).await.unwrap());
            }
            other => panic!("unexpected frame {}", other.kind()),
        }
    }
    done.expect("file_end delivered")
}

async fn roundtrip(len: usize, expected_chunks: u64) {
    let tmp = TempDir::new().unwrap();
    let (server, client) = ready_pair();
    let original = patterned(len);
    let src = write_test_file(tmp.path(), "payload.bin", &original);

    let frames = sender_frames(&src, &client).await;
    assert_eq!(frames.len() as u64, expected_chunks + 2);

    let inbox = tmp.path().join("inbox");
    let mut rx = TransferReceiver::new(&inbox);
    let done = deliver(frames, &mut rx, &server).await;

    assert!(done.is_complete());
    assert_eq!(done.total_chunks, expected_chunks);
    assert_eq!(done.bytes_written, len as u64);
    assert_eq!(std::fs::read(inbox.join("payload.bin")).unwrap(), original);

    // Raw sink holds one padded ciphertext per chunk
    let raw_len = std::fs::metadata(inbox.join("payload.bin(encrypted)"))
        .unwrap()
        .len();
    let full = (len / CHUNK_SIZE) as u64;
    let tail = (len % CHUNK_SIZE) as u64;
    let mut expected_raw = full * (CHUNK_SIZE as u64 + 16);
    if tail > 0 {
        expected_raw += (tail / 16 + 1) * 16;
    }
    assert_eq!(raw_len, expected_raw);
}

#[tokio::test]
async fn reconstructs_exact_multiple_of_chunk_size() {
    roundtrip(2 * CHUNK_SIZE, 2).await;
}

#[tokio::test]
async fn reconstructs_partial_final_chunk() {
    roundtrip(2 * CHUNK_SIZE + 1000, 3).await;
}

#[tokio::test]
async fn reconstructs_file_smaller_than_one_chunk() {
    roundtrip(17, 1).await;
}

#[tokio::test]
async fn reconstructs_out_of_order_chunks() {
    let tmp = TempDir::new().unwrap();
    let (server, client) = ready_pair();
    let original = patterned(3 * CHUNK_SIZE + 12345);
    let src = write_test_file(tmp.path(), "shuffled.bin", &original);

    let mut frames = sender_frames(&src, &client).await;
    let end = frames.pop().unwrap();
    let start = frames.remove(0);
    frames.reverse();
    frames.swap(0, 2);

    let mut ordered = vec![start];
    ordered.extend(frames);
    ordered.push(end);

    let mut rx = TransferReceiver::new(tmp.path().join("inbox"));
    let done = deliver(ordered, &mut rx, &server).await;

    assert!(done.is_complete());
    assert_eq!(done.chunks_received, 4);
    assert_eq!(std::fs::read(&done.path).unwrap(), original);
}

#[tokio::test]
async fn rejects_concurrent_file_start() {
    let tmp = TempDir::new().unwrap();
    let (server, client) = ready_pair();
    let first = write_test_file(tmp.path(), "first.bin", &patterned(CHUNK_SIZE + 1));
    let second = write_test_file(tmp.path(), "second.bin", &patterned(99));

    let mut first_frames = sender_frames(&first, &client).await.into_iter();
    let second_frames = sender_frames(&second, &client).await;

    let mut rx = TransferReceiver::new(tmp.path().join("inbox"));

    // file_start + chunk 0 of the first file
    for frame in first_frames.by_ref().take(2) {
        match frame {
            Frame::FileStart {
                filename,
                size,
                total_chunks,
            } => {
                rx.on_file_start(&filename, size, total_chunks).await.unwrap();
            }
            Frame::FileChunk { chunk_id, data } => {
                rx.on_file_chunk(&server, chunk_id, &data).await.unwrap();
            }
            _ => unreachable!(),
        }
    }
    assert_eq!(rx.chunks_received(), Some(1));

    let Frame::FileStart {
        filename,
        size,
        total_chunks,
    } = &second_frames[0]
    else {
        panic!("expected file_start");
    };
    let err = rx
        .on_file_start(filename, *size, *total_chunks)
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::TransferInProgress { .. }));
    assert!(!err.is_fatal());
    assert_eq!(rx.active(), Some("first.bin"));
    assert_eq!(rx.chunks_received(), Some(1));

    // The first transfer still completes
    let mut done = None;
    for frame in first_frames {
        match frame {
            Frame::FileChunk { chunk_id, data } => {
                rx.on_file_chunk(&server, chunk_id, &data).await.unwrap();
            }
            Frame::FileEnd { filename } => done = Some(rx.on_file_end(&filename).await.unwrap()),
            _ => unreachable!(),
        }
    }
    let done = done.unwrap();
    assert!(done.is_complete());
    assert_eq!(std::fs::read(done.path).unwrap(), patterned(CHUNK_SIZE + 1));
    assert!(!tmp.path().join("inbox/second.bin").exists());
}

#[tokio::test]
async fn rejects_out_of_range_chunk() {
    let tmp = TempDir::new().unwrap();
    let (server, client) = ready_pair();
    let mut rx = TransferReceiver::new(tmp.path());
    rx.on_file_start("two.bin", CHUNK_SIZE as u64 + 1, 2)
        .await
        .unwrap();

    let sealed = client.encrypt_payload(b"stray").unwrap();
    let err = rx.on_file_chunk(&server, 2, &sealed).await.unwrap_err();
    assert!(matches!(
        err,
        ChannelError::ChunkOutOfRange {
            chunk_id: 2,
            total_chunks: 2
        }
    ));
    assert_eq!(rx.chunks_received(), Some(0));
}

#[tokio::test]
async fn chunk_sealed_under_other_key_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let (server, _client) = ready_pair();
    let (_other_server, other_client) = ready_pair();

    let mut rx = TransferReceiver::new(tmp.path());
    rx.on_file_start("x.bin", 64, 1).await.unwrap();

    // Wrong key: padding check fails with overwhelming probability, and the
    // chunk must never be counted as received.
    let sealed = other_client.encrypt_payload(&[0u8; 64]).unwrap();
    let result = rx.on_file_chunk(&server, 0, &sealed).await;
    if let Err(err) = &result {
        assert!(!err.is_fatal());
        assert_eq!(rx.chunks_received(), Some(0));
    } else {
        let done = rx.on_file_end("x.bin").await.unwrap();
        assert_ne!(std::fs::read(done.path).unwrap(), vec![0u8; 64]);
    }
}
