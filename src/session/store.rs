// Session and chunk record store

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::RwLock;

use super::model::{TransferSession, TransferStatus};
use crate::chunking::{Chunk, ChunkBitmap};
use crate::common::error::{Error, Result};
use crate::common::types::ChunkIndex;

/// Result of recording one received chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptUpdate {
    /// False when the chunk was already on record
    pub newly_recorded: bool,
    pub received: u32,
    pub total: u32,
}

impl ReceiptUpdate {
    pub fn is_complete(&self) -> bool {
        self.received >= self.total
    }
}

/// Per-chunk flag counted by [`SessionStore::count_chunks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFlag {
    Received,
    Verified,
    Transmitted,
}

/// Durable home for sessions and the chunks received for them.
///
/// `record_received_chunk` must be atomic: the duplicate check, the insert
/// and the session counter update happen under one lock so concurrent
/// readers never see a count that disagrees with the chunk records.
pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &TransferSession) -> Result<()>;

    /// Fails with `SessionNotFound` for unknown ids
    fn load_session(&self, session_id: &str) -> Result<TransferSession>;

    fn list_sessions(&self) -> Result<Vec<TransferSession>>;

    /// Removes the session and all of its chunk records
    fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Load, modify and save a session under the store lock
    fn update_session(
        &self,
        session_id: &str,
        update: &mut dyn FnMut(&mut TransferSession) -> Result<()>,
    ) -> Result<TransferSession>;

    /// Drop the chunk records of a session, keeping the session row
    fn clear_chunks(&self, session_id: &str) -> Result<()>;

    /// Insert a received chunk unless already present and bump `chunks_received`
    fn record_received_chunk(&self, chunk: &Chunk) -> Result<ReceiptUpdate>;

    /// Chunk records of a session, ordered by index
    fn chunks_for_session(&self, session_id: &str) -> Result<Vec<Chunk>>;

    /// Set a flag on a stored chunk record. Returns false if no record exists.
    fn mark_chunk(&self, session_id: &str, chunk_index: ChunkIndex, flag: ChunkFlag) -> Result<bool>;

    fn count_chunks(&self, session_id: &str, flag: ChunkFlag) -> Result<u32>;

    fn find_by_token(&self, resume_token: &str) -> Result<Option<TransferSession>> {
        Ok(self
            .list_sessions()?
            .into_iter()
            .find(|s| s.resume_token == resume_token))
    }

    fn received_indices(&self, session_id: &str) -> Result<Vec<ChunkIndex>> {
        Ok(self
            .chunks_for_session(session_id)?
            .iter()
            .map(|c| c.chunk_index)
            .collect())
    }

    /// Received indices of a session as a bitmap over `[0, total)`
    fn received_bitmap(&self, session_id: &str) -> Result<ChunkBitmap> {
        let session = self.load_session(session_id)?;
        Ok(ChunkBitmap::from_indices(
            session.total_chunks,
            self.received_indices(session_id)?,
        ))
    }

    /// `[0, total) - received`, ascending
    fn missing_indices(&self, session_id: &str) -> Result<Vec<ChunkIndex>> {
        Ok(self.received_bitmap(session_id)?.find_missing())
    }

    /// Sessions that are not completed or cancelled
    fn incomplete_sessions(&self) -> Result<Vec<TransferSession>> {
        let mut sessions: Vec<_> = self
            .list_sessions()?
            .into_iter()
            .filter(|s| !s.is_terminal())
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        Ok(sessions)
    }

    fn count_by_status(&self) -> Result<HashMap<TransferStatus, usize>> {
        let mut counts = HashMap::new();
        for session in self.list_sessions()? {
            *counts.entry(session.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Delete terminal sessions that ended more than `retention` before `now_ms`
    fn purge_expired(&self, retention: Duration, now_ms: u64) -> Result<usize> {
        let cutoff = now_ms.saturating_sub(retention.as_millis() as u64);
        let mut purged = 0;
        for session in self.list_sessions()? {
            let ended = session.end_time.unwrap_or(session.updated_at);
            if session.is_terminal() && ended < cutoff {
                self.delete_session(&session.id)?;
                purged += 1;
            }
        }
        if purged > 0 {
            log::info!("Purged {} expired sessions", purged);
        }
        Ok(purged)
    }
}

/// Apply a flag to a chunk record in place
pub(crate) fn set_flag(chunk: &mut Chunk, flag: ChunkFlag) {
    match flag {
        ChunkFlag::Received => chunk.received = true,
        ChunkFlag::Verified => chunk.verified = true,
        ChunkFlag::Transmitted => chunk.transmitted = true,
    }
}

pub(crate) fn has_flag(chunk: &Chunk, flag: ChunkFlag) -> bool {
    match flag {
        ChunkFlag::Received => true,
        ChunkFlag::Verified => chunk.verified,
        ChunkFlag::Transmitted => chunk.transmitted,
    }
}

/// Validate an incoming chunk record against its session row
pub(crate) fn check_chunk_for_session(chunk: &Chunk, session: &TransferSession) -> Result<()> {
    if chunk.chunk_index >= session.total_chunks {
        return Err(Error::Storage(format!(
            "chunk {} outside session {} of {} chunks",
            chunk.chunk_index, session.id, session.total_chunks
        )));
    }
    Ok(())
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, TransferSession>,
    chunks: HashMap<String, BTreeMap<ChunkIndex, Chunk>>,
}

/// Process-local store, used by tests and by receivers that do not persist
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn save_session(&self, session: &TransferSession) -> Result<()> {
        self.inner
            .write()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn load_session(&self, session_id: &str) -> Result<TransferSession> {
        self.inner
            .read()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    fn list_sessions(&self) -> Result<Vec<TransferSession>> {
        Ok(self.inner.read().sessions.values().cloned().collect())
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.sessions.remove(session_id);
        inner.chunks.remove(session_id);
        Ok(())
    }

    fn update_session(
        &self,
        session_id: &str,
        update: &mut dyn FnMut(&mut TransferSession) -> Result<()>,
    ) -> Result<TransferSession> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let mut updated = session.clone();
        update(&mut updated)?;
        *session = updated.clone();
        Ok(updated)
    }

    fn clear_chunks(&self, session_id: &str) -> Result<()> {
        self.inner.write().chunks.remove(session_id);
        Ok(())
    }

    fn record_received_chunk(&self, chunk: &Chunk) -> Result<ReceiptUpdate> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let session = inner
            .sessions
            .get_mut(&chunk.session_id)
            .ok_or_else(|| Error::SessionNotFound(chunk.session_id.clone()))?;
        check_chunk_for_session(chunk, session)?;

        let records = inner.chunks.entry(chunk.session_id.clone()).or_default();
        let newly_recorded = !records.contains_key(&chunk.chunk_index);
        if newly_recorded {
            let mut record = chunk.clone();
            record.received = true;
            records.insert(chunk.chunk_index, record);
            session.chunks_received = (session.chunks_received + 1).min(session.total_chunks);
            session.touch();
        }
        Ok(ReceiptUpdate {
            newly_recorded,
            received: session.chunks_received,
            total: session.total_chunks,
        })
    }

    fn chunks_for_session(&self, session_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .inner
            .read()
            .chunks
            .get(session_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn mark_chunk(&self, session_id: &str, chunk_index: ChunkIndex, flag: ChunkFlag) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner
            .chunks
            .get_mut(session_id)
            .and_then(|records| records.get_mut(&chunk_index))
        {
            Some(record) => {
                set_flag(record, flag);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count_chunks(&self, session_id: &str, flag: ChunkFlag) -> Result<u32> {
        Ok(self
            .inner
            .read()
            .chunks
            .get(session_id)
            .map(|records| records.values().filter(|c| has_flag(c, flag)).count() as u32)
            .unwrap_or(0))
    }
}
