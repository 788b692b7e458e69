// Error types and error handling

use std::fmt;
use std::io;

use crate::compression::CompressionAlgorithm;

/// Why a single chunk was refused by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkRejection {
    /// Recomputed payload hash differs from the one the chunk carries
    HashMismatch,
    /// `chunk_index` is not inside `[0, total_chunks)`
    IndexOutOfRange { total: u32 },
    /// Timestamp older than the freshness window
    Stale { age_ms: u64 },
    /// Chunk disagrees with the transfer it claims to belong to
    Inconsistent(String),
}

impl fmt::Display for ChunkRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkRejection::HashMismatch => write!(f, "payload hash mismatch"),
            ChunkRejection::IndexOutOfRange { total } => {
                write!(f, "index out of range (total {})", total)
            }
            ChunkRejection::Stale { age_ms } => write!(f, "stale chunk ({} ms old)", age_ms),
            ChunkRejection::Inconsistent(e) => write!(f, "inconsistent metadata: {}", e),
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    InvalidChunk { index: u32, reason: ChunkRejection },
    MalformedChunk(String),
    Capacity(String),
    Compression { algorithm: CompressionAlgorithm, message: String },
    Decompression { algorithm: CompressionAlgorithm, message: String },
    Galois(String),
    Fec(String),
    Unrecoverable { damaged_chunks: Vec<u32>, confidence: f64 },
    HashMismatch { expected: String, actual: String },
    Storage(String),
    SessionNotFound(String),
    InvalidTransition { from: String, event: String },
    AlreadyComplete(String),
    EmptyFile(String),
    SerializationError(String),
    DeserializationError(String),
    ConfigError(String),
}

impl Error {
    /// Chunk index the error is about, when there is one
    pub fn chunk_index(&self) -> Option<u32> {
        match self {
            Error::InvalidChunk { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Whether the error is a whole-transfer failure rather than a per-chunk drop
    pub fn is_fatal_to_transfer(&self) -> bool {
        matches!(
            self,
            Error::Unrecoverable { .. } | Error::HashMismatch { .. } | Error::Decompression { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::InvalidChunk { index, reason } => {
                write!(f, "Chunk {} rejected: {}", index, reason)
            }
            Error::MalformedChunk(e) => write!(f, "Malformed chunk: {}", e),
            Error::Capacity(e) => write!(f, "Capacity error: {}", e),
            Error::Compression { algorithm, message } => {
                write!(f, "{} compression failed: {}", algorithm, message)
            }
            Error::Decompression { algorithm, message } => {
                write!(f, "{} decompression failed: {}", algorithm, message)
            }
            Error::Galois(e) => write!(f, "Galois field error: {}", e),
            Error::Fec(e) => write!(f, "Erasure coding error: {}", e),
            Error::Unrecoverable { damaged_chunks, confidence } => write!(
                f,
                "Unrecoverable corruption: {} damaged chunks, recovery confidence {:.2}",
                damaged_chunks.len(),
                confidence
            ),
            Error::HashMismatch { expected, actual } => {
                write!(f, "Hash mismatch: expected {}, got {}", expected, actual)
            }
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::SessionNotFound(id) => write!(f, "Session {} not found", id),
            Error::InvalidTransition { from, event } => {
                write!(f, "Cannot apply '{}' to a session in state {}", event, from)
            }
            Error::AlreadyComplete(id) => write!(f, "Session {} has no missing chunks", id),
            Error::EmptyFile(path) => write!(f, "Source file is empty: {}", path),
            Error::SerializationError(e) => write!(f, "Serialization error: {}", e),
            Error::DeserializationError(e) => write!(f, "Deserialization error: {}", e),
            Error::ConfigError(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Error::Io(err.into())
        } else {
            Error::DeserializationError(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_index_only_for_chunk_errors() {
        let err = Error::InvalidChunk { index: 7, reason: ChunkRejection::HashMismatch };
        assert_eq!(err.chunk_index(), Some(7));
        assert_eq!(Error::Capacity("x".into()).chunk_index(), None);
    }

    #[test]
    fn test_display_carries_context() {
        let err = Error::Decompression {
            algorithm: CompressionAlgorithm::Gzip,
            message: "truncated".into(),
        };
        let text = err.to_string();
        assert!(text.contains("gzip"));
        assert!(text.contains("truncated"));

        let err = Error::InvalidChunk { index: 3, reason: ChunkRejection::IndexOutOfRange { total: 2 } };
        assert!(err.to_string().contains("Chunk 3"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Unrecoverable { damaged_chunks: vec![1], confidence: 0.0 }.is_fatal_to_transfer());
        assert!(!Error::InvalidChunk { index: 0, reason: ChunkRejection::HashMismatch }
            .is_fatal_to_transfer());
    }
}
