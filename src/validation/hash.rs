// Whole-file hash validation

use crate::common::error::{Error, Result};

/// BLAKE3 digest length in hex characters
pub const HASH_HEX_LEN: usize = 64;

/// Check a hex hash has the right shape
pub fn validate_hash_hex(hash: &str) -> Result<()> {
    if hash.len() != HASH_HEX_LEN || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::MalformedChunk(format!(
            "Invalid hash '{}' (expected {} hex characters)",
            hash, HASH_HEX_LEN
        )));
    }
    Ok(())
}

/// Verify data matches a hex BLAKE3 hash
pub fn verify_data_hash(data: &[u8], expected_hash: &str) -> Result<()> {
    validate_hash_hex(expected_hash)?;

    let actual = compute_hash(data);
    if !actual.eq_ignore_ascii_case(expected_hash) {
        return Err(Error::HashMismatch {
            expected: expected_hash.to_ascii_lowercase(),
            actual,
        });
    }
    Ok(())
}

/// Compute the hex BLAKE3 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
