// Chunk validation

use std::time::Duration;

use super::hash::validate_hash_hex;
use crate::chunking::Chunk;
use crate::common::error::{ChunkRejection, Error, Result};
use crate::common::types::{DEFAULT_FRESHNESS_WINDOW, MAX_FILE_NAME_LEN, MAX_ID_LEN};
use crate::fec::StripeLayout;

/// Per-chunk checks run by the receiver before a chunk is stored
#[derive(Debug, Clone)]
pub struct ChunkValidator {
    freshness_window: Duration,
    verify_payload: bool,
}

impl Default for ChunkValidator {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW, true)
    }
}

fn reject(chunk: &Chunk, reason: ChunkRejection) -> Error {
    Error::InvalidChunk {
        index: chunk.chunk_index,
        reason,
    }
}

fn inconsistent(chunk: &Chunk, message: String) -> Error {
    reject(chunk, ChunkRejection::Inconsistent(message))
}

impl ChunkValidator {
    pub fn new(freshness_window: Duration, verify_payload: bool) -> Self {
        Self {
            freshness_window,
            verify_payload,
        }
    }

    /// Run every enabled check
    ///
    /// # Arguments
    /// * `chunk` - The chunk to validate
    /// * `now_ms` - Current time in Unix milliseconds
    ///
    /// # Returns
    /// * `Ok(())` - If the chunk may be stored
    /// * `Err(Error::InvalidChunk)` - Naming the chunk index and the reason
    pub fn validate(&self, chunk: &Chunk, now_ms: u64) -> Result<()> {
        self.validate_index(chunk)?;
        self.validate_freshness(chunk, now_ms)?;
        self.validate_shape(chunk)?;
        if self.verify_payload {
            self.validate_payload(chunk)?;
        }
        Ok(())
    }

    pub fn validate_index(&self, chunk: &Chunk) -> Result<()> {
        if chunk.chunk_index >= chunk.total_chunks {
            return Err(reject(
                chunk,
                ChunkRejection::IndexOutOfRange { total: chunk.total_chunks },
            ));
        }
        Ok(())
    }

    pub fn validate_freshness(&self, chunk: &Chunk, now_ms: u64) -> Result<()> {
        if chunk.is_stale(now_ms, self.freshness_window) {
            return Err(reject(chunk, ChunkRejection::Stale { age_ms: chunk.age_ms(now_ms) }));
        }
        Ok(())
    }

    /// Chunk counts, sizes and FEC fields must describe one coherent layout
    pub fn validate_shape(&self, chunk: &Chunk) -> Result<()> {
        validate_hash_hex(&chunk.file_hash).map_err(|e| inconsistent(chunk, e.to_string()))?;
        if !is_valid_id(&chunk.file_id) || !is_valid_id(&chunk.session_id) {
            return Err(inconsistent(chunk, "file and session ids must be lowercase hex".into()));
        }
        if chunk.chunk_size == 0 {
            return Err(inconsistent(chunk, "zero chunk size".into()));
        }

        let c = chunk.chunk_size as u64;
        let expected_data = (chunk.data_length + c - 1) / c;
        if expected_data != chunk.data_chunks as u64 {
            return Err(inconsistent(
                chunk,
                format!(
                    "{} data bytes in {}-byte chunks is {} chunks, not {}",
                    chunk.data_length, c, expected_data, chunk.data_chunks
                ),
            ));
        }

        let expected_total = match chunk.fec_scheme() {
            Some(scheme) => {
                scheme.validate().map_err(|e| inconsistent(chunk, e.to_string()))?;
                StripeLayout::new(chunk.data_chunks as usize, c as usize, scheme).total_chunks()
            }
            None => chunk.data_chunks as usize,
        };
        if expected_total != chunk.total_chunks as usize {
            return Err(inconsistent(
                chunk,
                format!("total {} does not match layout {}", chunk.total_chunks, expected_total),
            ));
        }

        let should_be_parity = chunk.chunk_index >= chunk.data_chunks;
        if chunk.is_parity() != should_be_parity {
            return Err(inconsistent(chunk, "parity flag disagrees with index".into()));
        }
        Ok(())
    }

    /// Decode the payload, check its length and recompute its hash
    pub fn validate_payload(&self, chunk: &Chunk) -> Result<()> {
        let payload = chunk.payload_bytes().map_err(|e| inconsistent(chunk, e.to_string()))?;
        let parity = chunk.parity_bytes().map_err(|e| inconsistent(chunk, e.to_string()))?;

        let c = chunk.chunk_size as u64;
        match &parity {
            Some(parity) => {
                if !payload.is_empty() || parity.len() as u64 != c {
                    return Err(inconsistent(chunk, format!("parity shard of {} bytes", parity.len())));
                }
            }
            None => {
                let start = chunk.chunk_index as u64 * c;
                let expected = c.min(chunk.data_length.saturating_sub(start));
                if payload.len() as u64 != expected {
                    return Err(inconsistent(
                        chunk,
                        format!("payload of {} bytes, expected {}", payload.len(), expected),
                    ));
                }
            }
        }

        if !chunk.verify_payload_hash() {
            return Err(reject(chunk, ChunkRejection::HashMismatch));
        }
        Ok(())
    }

    /// A chunk must agree with the transfer it claims to belong to
    pub fn check_against(&self, chunk: &Chunk, reference: &Chunk) -> Result<()> {
        let mismatch = if chunk.file_hash != reference.file_hash {
            Some("file hash")
        } else if chunk.total_chunks != reference.total_chunks {
            Some("total chunks")
        } else if chunk.data_length != reference.data_length {
            Some("data length")
        } else if chunk.chunk_size != reference.chunk_size {
            Some("chunk size")
        } else if chunk.fec_scheme() != reference.fec_scheme() {
            Some("erasure coding scheme")
        } else if chunk.compression_algorithm != reference.compression_algorithm {
            Some("compression algorithm")
        } else {
            None
        };
        match mismatch {
            Some(field) => Err(inconsistent(chunk, format!("{} differs from transfer", field))),
            None => Ok(()),
        }
    }
}

/// Ids are generated as lowercase hex; anything else did not come from a sender
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Reduce a sender-supplied name to a safe single path component
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let mut cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    while cleaned.starts_with('.') {
        cleaned.remove(0);
    }
    cleaned.truncate(MAX_FILE_NAME_LEN);
    if cleaned.is_empty() {
        return "received.bin".to_string();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{ChunkFramer, ChunkHasher, FrameHeader};
    use crate::common::types::ErrorLevel;
    use crate::compression::CompressionAlgorithm;
    use crate::fec::{encode_stream, FecScheme};

    const NOW: u64 = 1_700_000_000_000;

    fn chunks(fec: Option<FecScheme>) -> Vec<Chunk> {
        let stream: Vec<u8> = (0..1000u32).map(|i| (i % 97) as u8).collect();
        let parity = match fec {
            Some(scheme) => encode_stream(&stream, &StripeLayout::new(4, 300, scheme)).unwrap(),
            None => Vec::new(),
        };
        let header = FrameHeader {
            file_id: "f".repeat(32),
            session_id: "5e".repeat(16),
            file_hash: ChunkHasher::hash(&stream),
            file_name: "x.bin".into(),
            file_size: 1000,
            code_version: 30,
            level: ErrorLevel::Medium,
            compression: CompressionAlgorithm::None,
            compression_ratio: 1.0,
            chunk_size: 300,
            fec,
        };
        ChunkFramer::new(header, stream, parity)
            .unwrap()
            .with_timestamp(NOW)
            .collect_all()
            .unwrap()
    }

    fn reason(result: Result<()>) -> ChunkRejection {
        match result {
            Err(Error::InvalidChunk { reason, .. }) => reason,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_chunks_pass() {
        let validator = ChunkValidator::default();
        for chunk in chunks(Some(FecScheme::low())) {
            validator.validate(&chunk, NOW + 1000).unwrap();
        }
    }

    #[test]
    fn test_index_out_of_range() {
        let mut chunk = chunks(None).remove(0);
        chunk.chunk_index = 9;
        let r = reason(ChunkValidator::default().validate(&chunk, NOW));
        assert_eq!(r, ChunkRejection::IndexOutOfRange { total: 4 });
    }

    #[test]
    fn test_stale_chunk() {
        let chunk = chunks(None).remove(0);
        let later = NOW + DEFAULT_FRESHNESS_WINDOW.as_millis() as u64 + 1;
        assert!(matches!(
            reason(ChunkValidator::default().validate(&chunk, later)),
            ChunkRejection::Stale { .. }
        ));
    }

    #[test]
    fn test_hash_mismatch_only_when_verifying() {
        let mut chunk = chunks(None).remove(1);
        let mut bytes = chunk.payload_bytes().unwrap();
        bytes[0] ^= 0xFF;
        chunk.payload = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes);

        let r = reason(ChunkValidator::default().validate(&chunk, NOW));
        assert_eq!(r, ChunkRejection::HashMismatch);
        assert!(ChunkValidator::new(DEFAULT_FRESHNESS_WINDOW, false)
            .validate(&chunk, NOW)
            .is_ok());
    }

    #[test]
    fn test_inconsistent_layout() {
        let mut chunk = chunks(None).remove(0);
        chunk.total_chunks = 5;
        assert!(matches!(
            reason(ChunkValidator::default().validate(&chunk, NOW)),
            ChunkRejection::Inconsistent(_)
        ));

        let all = chunks(None);
        let mut other = all[1].clone();
        other.file_hash = ChunkHasher::hash(b"another file");
        assert!(ChunkValidator::default().check_against(&other, &all[0]).is_err());
        assert!(ChunkValidator::default().check_against(&all[2], &all[0]).is_ok());
    }

    #[test]
    fn test_ids_must_be_lowercase_hex() {
        let validator = ChunkValidator::default();
        let too_long = "a".repeat(MAX_ID_LEN + 1);
        for bad in ["../escaped", "", "ABCDEF", "5e/5e", too_long.as_str()] {
            let mut chunk = chunks(None).remove(0);
            chunk.session_id = bad.to_string();
            assert!(matches!(
                reason(validator.validate(&chunk, NOW)),
                ChunkRejection::Inconsistent(_)
            ));

            let mut chunk = chunks(None).remove(0);
            chunk.file_id = bad.to_string();
            assert!(validator.validate_shape(&chunk).is_err());
        }
        assert!(is_valid_id(&"0123456789abcdef".repeat(2)));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\temp\\report v2.pdf"), "report_v2.pdf");
        assert_eq!(sanitize_file_name("..hidden"), "hidden");
        assert_eq!(sanitize_file_name(""), "received.bin");
        assert_eq!(sanitize_file_name(&"a".repeat(300)).len(), MAX_FILE_NAME_LEN);
    }
}
