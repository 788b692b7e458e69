// qrxfer - one-way file transfer over sequences of QR symbols

pub mod capacity;
pub mod chunking;
pub mod common;
pub mod compression;
pub mod fec;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod session;
pub mod validation;

// Export the main entry points
pub use crate::chunking::Chunk;
pub use crate::common::config::{CompressionMode, TransferConfig};
pub use crate::common::error::{Error, Result};
pub use crate::receiver::{ChunkOutcome, ReceivedFile, Receiver};
pub use crate::scheduler::{CyclePolicy, Scheduler, SchedulerHandle, SymbolRenderer};
pub use crate::sender::{encode_file, EncodedTransfer, Encoder};
pub use crate::session::{FileStore, MemoryStore, ResumeManager, SessionStore, TransferSession};
