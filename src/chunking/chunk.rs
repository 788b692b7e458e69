// Chunk record and its JSON wire form

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::hasher::ChunkHasher;
use crate::common::error::{Error, Result};
use crate::common::types::{ChunkIndex, ErrorLevel, FileId, SessionId};
use crate::compression::CompressionAlgorithm;
use crate::fec::FecScheme;

fn one() -> f64 {
    1.0
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// One transmissible unit: the payload string embedded in a single symbol.
///
/// Every chunk repeats the transfer metadata so that any one of them is
/// enough to start reassembly. Unknown JSON fields are ignored on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub file_id: FileId,
    pub session_id: SessionId,
    pub chunk_index: ChunkIndex,
    pub total_chunks: u32,
    /// Base64 data bytes; empty on parity chunks
    #[serde(default)]
    pub payload: String,
    pub payload_hash: String,
    pub file_hash: String,
    /// Unix milliseconds
    pub timestamp: u64,
    pub code_version: u8,
    pub error_tolerance_level: ErrorLevel,
    /// Base64 parity shard, only on parity chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity_payload: Option<String>,
    #[serde(default)]
    pub is_compressed: bool,
    #[serde(default = "one")]
    pub compression_ratio: f64,
    #[serde(default)]
    pub compression_algorithm: CompressionAlgorithm,
    #[serde(default)]
    pub file_name: String,
    pub file_size: u64,
    /// Length of the processed (possibly compressed) stream
    pub data_length: u64,
    /// Raw bytes per data chunk; parity shards have exactly this length
    pub chunk_size: u32,
    pub data_chunks: u32,
    /// Zero when the transfer carries no parity
    #[serde(default)]
    pub fec_data_shards: u32,
    #[serde(default)]
    pub fec_parity_shards: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub transmitted: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub received: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub verified: bool,
}

impl Chunk {
    /// Parse a decoded symbol string
    pub fn from_wire(text: &str) -> Result<Chunk> {
        serde_json::from_str(text.trim()).map_err(|e| Error::MalformedChunk(e.to_string()))
    }

    /// Serialize for embedding in a symbol
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    pub fn is_parity(&self) -> bool {
        self.parity_payload.is_some()
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        STANDARD.decode(&self.payload).map_err(|e| {
            Error::MalformedChunk(format!("chunk {} payload: {}", self.chunk_index, e))
        })
    }

    pub fn parity_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.parity_payload
            .as_ref()
            .map(|p| {
                STANDARD.decode(p).map_err(|e| {
                    Error::MalformedChunk(format!("chunk {} parity: {}", self.chunk_index, e))
                })
            })
            .transpose()
    }

    /// Recompute the payload hash; undecodable payloads never verify
    pub fn verify_payload_hash(&self) -> bool {
        let (payload, parity) = match (self.payload_bytes(), self.parity_bytes()) {
            (Ok(payload), Ok(parity)) => (payload, parity),
            _ => return false,
        };
        let actual = ChunkHasher::payload_hash(&payload, parity.as_deref());
        actual.eq_ignore_ascii_case(&self.payload_hash)
    }

    /// Older than `window` relative to `now_ms`. Clock skew into the future is tolerated.
    pub fn is_stale(&self, now_ms: u64, window: Duration) -> bool {
        now_ms.saturating_sub(self.timestamp) > window.as_millis() as u64
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }

    pub fn fec_scheme(&self) -> Option<FecScheme> {
        if self.fec_data_shards == 0 || self.fec_parity_shards == 0 {
            return None;
        }
        Some(FecScheme {
            data_shards: self.fec_data_shards as usize,
            parity_shards: self.fec_parity_shards as usize,
        })
    }

    /// One-line description for logs
    pub fn chunk_info(&self) -> String {
        format!(
            "{} {}/{} of {} ({} bytes, v{}{})",
            if self.is_parity() { "parity" } else { "data" },
            self.chunk_index + 1,
            self.total_chunks,
            self.file_name,
            self.file_size,
            self.code_version,
            self.error_tolerance_level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Chunk {
        let payload = b"hello chunk";
        Chunk {
            id: "00112233aabbccdd".into(),
            file_id: "f".repeat(32),
            session_id: "5e".repeat(16),
            chunk_index: 0,
            total_chunks: 1,
            payload: STANDARD.encode(payload),
            payload_hash: ChunkHasher::payload_hash(payload, None),
            file_hash: ChunkHasher::hash(payload),
            timestamp: 1_700_000_000_000,
            code_version: 10,
            error_tolerance_level: ErrorLevel::Medium,
            parity_payload: None,
            is_compressed: false,
            compression_ratio: 1.0,
            compression_algorithm: CompressionAlgorithm::None,
            file_name: "hello.txt".into(),
            file_size: payload.len() as u64,
            data_length: payload.len() as u64,
            chunk_size: 64,
            data_chunks: 1,
            fec_data_shards: 0,
            fec_parity_shards: 0,
            transmitted: false,
            received: false,
            verified: false,
        }
    }

    #[test]
    fn test_wire_uses_camel_case_and_skips_unset_flags() {
        let wire = sample().to_wire().unwrap();
        assert!(wire.contains("\"chunkIndex\":0"));
        assert!(wire.contains("\"errorToleranceLevel\":\"M\""));
        assert!(!wire.contains("parityPayload"));
        assert!(!wire.contains("transmitted"));
        assert_eq!(Chunk::from_wire(&wire).unwrap(), sample());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["futureField"] = serde_json::json!({"nested": [1, 2, 3]});
        let parsed = Chunk::from_wire(&value.to_string()).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_malformed_strings_are_errors() {
        for text in ["", "not json", "{\"id\":1}", "[1,2,3]"] {
            assert!(matches!(Chunk::from_wire(text), Err(Error::MalformedChunk(_))));
        }
    }

    #[test]
    fn test_payload_hash_verification() {
        let mut chunk = sample();
        assert!(chunk.verify_payload_hash());
        chunk.payload = STANDARD.encode(b"hello chunK");
        assert!(!chunk.verify_payload_hash());
        chunk.payload = "***".into();
        assert!(!chunk.verify_payload_hash());
    }

    #[test]
    fn test_parity_chunk() {
        let mut chunk = sample();
        chunk.payload = String::new();
        chunk.parity_payload = Some(STANDARD.encode([9u8; 4]));
        chunk.payload_hash = ChunkHasher::payload_hash(&[], Some(&[9u8; 4][..]));
        assert!(chunk.is_parity());
        assert!(chunk.verify_payload_hash());
        assert_eq!(chunk.parity_bytes().unwrap(), Some(vec![9u8; 4]));
        assert!(chunk.chunk_info().starts_with("parity"));
    }

    #[test]
    fn test_staleness() {
        let chunk = sample();
        let window = Duration::from_secs(60);
        assert!(!chunk.is_stale(chunk.timestamp + 59_000, window));
        assert!(chunk.is_stale(chunk.timestamp + 61_000, window));
        assert!(!chunk.is_stale(chunk.timestamp - 5_000, window));
    }

    #[test]
    fn test_fec_scheme_from_fields() {
        let mut chunk = sample();
        assert_eq!(chunk.fec_scheme(), None);
        chunk.fec_data_shards = 10;
        chunk.fec_parity_shards = 3;
        assert_eq!(chunk.fec_scheme(), Some(FecScheme::medium()));
    }
}
