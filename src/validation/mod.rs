// Validation module

pub mod chunk;
pub mod hash;

pub use chunk::{is_valid_id, sanitize_file_name, ChunkValidator};
pub use hash::{compute_hash, validate_hash_hex, verify_data_hash};
