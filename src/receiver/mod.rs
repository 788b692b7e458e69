// Receiver module for chunk accumulation and file reconstruction

pub mod assembler;
pub mod output;
pub mod receiver;
pub mod recovery;

pub use assembler::{assemble, is_repairable, AssembledFile};
pub use output::{verify_file_hash, OutputWriter};
pub use receiver::{AssemblyState, ChunkOutcome, ReceivedFile, Receiver, TransferProgress};
pub use recovery::{try_recovery_methods, RecoveryAttempt, RecoveryMethod, RecoveryReport};
