// Hashing and identifier generation for chunks and transfers

use ring::rand::{SecureRandom, SystemRandom};

use crate::common::error::{Error, Result};

/// BLAKE3 hashing, rendered as lowercase hex
pub struct ChunkHasher;

impl ChunkHasher {
    pub fn hash(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    /// Hash of a chunk's payload followed by its parity bytes
    pub fn payload_hash(payload: &[u8], parity: Option<&[u8]>) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(payload);
        if let Some(parity) = parity {
            hasher.update(parity);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Constant-time comparison against a hex checksum
    pub fn verify(data: &[u8], checksum: &str) -> bool {
        match blake3::Hash::from_hex(checksum) {
            Ok(expected) => blake3::hash(data) == expected,
            Err(_) => false,
        }
    }

    /// Stable identifier for a source file: name, size and modification time
    pub fn file_id(name: &str, size: u64, modified_ms: u64) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(&size.to_le_bytes());
        hasher.update(&modified_ms.to_le_bytes());
        hasher.finalize().to_hex()[..32].to_string()
    }
}

/// `len` random bytes from the system generator, hex encoded
pub fn random_hex(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| Error::Storage("system random generator unavailable".into()))?;
    Ok(hex::encode(bytes))
}

pub fn generate_session_id() -> Result<String> {
    random_hex(16)
}

pub fn generate_resume_token() -> Result<String> {
    random_hex(32)
}

pub fn generate_chunk_id() -> Result<String> {
    random_hex(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        assert_eq!(ChunkHasher::hash(data), ChunkHasher::hash(data));
        assert_eq!(ChunkHasher::hash(data).len(), 64);
    }

    #[test]
    fn test_verify() {
        let data = b"test data";
        let hash = ChunkHasher::hash(data);
        assert!(ChunkHasher::verify(data, &hash));
        assert!(!ChunkHasher::verify(b"other", &hash));
        assert!(!ChunkHasher::verify(data, "not-hex"));
    }

    #[test]
    fn test_payload_hash_covers_parity() {
        let plain = ChunkHasher::payload_hash(b"abc", None);
        assert_eq!(plain, ChunkHasher::hash(b"abc"));
        assert_ne!(ChunkHasher::payload_hash(b"abc", Some(&b"p"[..])), plain);
        assert_eq!(ChunkHasher::payload_hash(b"", Some(&b"abc"[..])), plain);
    }

    #[test]
    fn test_file_id_depends_on_all_inputs() {
        let id = ChunkHasher::file_id("a.txt", 10, 1);
        assert_eq!(id.len(), 32);
        assert_ne!(id, ChunkHasher::file_id("a.txt", 11, 1));
        assert_ne!(id, ChunkHasher::file_id("a.txt", 10, 2));
        assert_eq!(id, ChunkHasher::file_id("a.txt", 10, 1));
    }

    #[test]
    fn test_random_ids() {
        let a = generate_session_id().unwrap();
        let b = generate_session_id().unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert_eq!(generate_resume_token().unwrap().len(), 64);
        assert_eq!(generate_chunk_id().unwrap().len(), 16);
    }
}
