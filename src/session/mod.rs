// Session module - transfer state, durable records and resume

pub mod file_store;
pub mod model;
pub mod resume;
pub mod store;

pub use file_store::FileStore;
pub use model::{next_status, SessionEvent, TransferSession, TransferStatus};
pub use resume::{ResumeManager, ResumePlan};
pub use store::{ChunkFlag, MemoryStore, ReceiptUpdate, SessionStore};
