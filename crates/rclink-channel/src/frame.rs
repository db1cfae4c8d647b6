//! Wire frames.
//!
//! Each frame is one JSON object whose `type` field selects the handler:
//! ```text
//! {"type":"dh_init","public_key":"<b64>"}
//! {"type":"dh_response","public_key":"<b64>"}
//! {"type":"message","data":"<b64 ciphertext>"}
//! {"type":"file_start","filename":"a.bin","size":300000,"total_chunks":2}
//! {"type":"file_chunk","chunk_id":0,"data":"<b64 ciphertext>"}
//! {"type":"file_end","filename":"a.bin"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Responder's DH public value (256-byte big-endian)
    DhInit {
        #[serde(with = "base64_bytes")]
        public_key: Vec<u8>,
    },
    /// Initiator's DH public value (256-byte big-endian)
    DhResponse {
        #[serde(with = "base64_bytes")]
        public_key: Vec<u8>,
    },
    /// Encrypted text message
    Message {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    FileStart {
        filename: String,
        size: u64,
        total_chunks: u64,
    },
    /// One independently padded and encrypted chunk
    FileChunk {
        chunk_id: u64,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    FileEnd {
        filename: String,
    },
}

impl Frame {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::DhInit { .. } => "dh_init",
            Frame::DhResponse { .. } => "dh_response",
            Frame::Message { .. } => "message",
            Frame::FileStart { .. } => "file_start",
            Frame::FileChunk { .. } => "file_chunk",
            Frame::FileEnd { .. } => "file_end",
        }
    }

    pub fn is_handshake(&self) -> bool {
        matches!(self, Frame::DhInit { .. } | Frame::DhResponse { .. })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ChannelError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChannelError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Standard base64 (with padding) for binary fields
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn to_json(frame: &Frame) -> Value {
        serde_json::from_slice(&frame.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_tags_are_snake_case() {
        let cases = [
            (Frame::DhInit { public_key: vec![1] }, "dh_init"),
            (Frame::DhResponse { public_key: vec![1] }, "dh_response"),
            (Frame::Message { data: vec![] }, "message"),
            (
                Frame::FileStart {
                    filename: "a".into(),
                    size: 0,
                    total_chunks: 0,
                },
                "file_start",
            ),
            (Frame::FileChunk { chunk_id: 0, data: vec![] }, "file_chunk"),
            (Frame::FileEnd { filename: "a".into() }, "file_end"),
        ];

        for (frame, tag) in cases {
            assert_eq!(to_json(&frame)["type"], tag);
            assert_eq!(frame.kind(), tag);
        }
    }

    #[test]
    fn test_binary_fields_are_base64() {
        let frame = Frame::FileChunk {
            chunk_id: 7,
            data: b"hello".to_vec(),
        };
        assert_eq!(
            to_json(&frame),
            json!({"type": "file_chunk", "chunk_id": 7, "data": "aGVsbG8="})
        );
    }

    #[test]
    fn test_decodes_peer_record() {
        let raw = br#"{"type":"file_start","filename":"report.pdf","size":524289,"total_chunks":3}"#;
        let frame = Frame::from_bytes(raw).unwrap();
        assert_eq!(
            frame,
            Frame::FileStart {
                filename: "report.pdf".into(),
                size: 524289,
                total_chunks: 3,
            }
        );
        assert!(!frame.is_handshake());
    }

    #[test]
    fn test_handshake_frame_decodes() {
        let raw = br#"{"type":"dh_init","public_key":"AAEC"}"#;
        let frame = Frame::from_bytes(raw).unwrap();
        assert_eq!(frame, Frame::DhInit { public_key: vec![0, 1, 2] });
        assert!(frame.is_handshake());
    }

    #[test]
    fn test_rejects_unknown_tag() {
        let err = Frame::from_bytes(br#"{"type":"file_resume","chunk_id":3}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Frame(_)));
    }

    #[test]
    fn test_rejects_bad_base64() {
        let err = Frame::from_bytes(br#"{"type":"message","data":"not base64!"}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Frame(_)));
    }

    #[test]
    fn test_rejects_missing_fields() {
        let err = Frame::from_bytes(br#"{"type":"file_chunk","data":"AA=="}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Frame(_)));
    }

    proptest! {
        #[test]
        fn prop_decode_arbitrary_bytes_never_panics(
            bytes in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let _ = Frame::from_bytes(&bytes);
        }

        #[test]
        fn prop_chunk_frame_survives_wire(
            chunk_id in any::<u64>(),
            data in proptest::collection::vec(any::<u8>(), 0..1024)
        ) {
            let frame = Frame::FileChunk { chunk_id, data };
            prop_assert_eq!(Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap(), frame);
        }
    }
}
