// Common utilities and shared code

pub mod error;
pub mod config;
pub mod types;

pub use error::{ChunkRejection, Error, Result};
pub use config::{CompressionMode, TransferConfig};
pub use types::*;
