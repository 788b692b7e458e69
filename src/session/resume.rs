// Resume support for interrupted transfers

use std::sync::Arc;

use super::model::{TransferSession, TransferStatus};
use super::store::SessionStore;
use crate::common::error::{Error, Result};
use crate::common::types::ChunkIndex;

/// What is left to do for a session being resumed
#[derive(Debug, Clone)]
pub struct ResumePlan {
    pub session: TransferSession,
    /// Ascending
    pub missing: Vec<ChunkIndex>,
    /// Contiguous runs of `missing` as inclusive (start, end) pairs
    pub gaps: Vec<(ChunkIndex, ChunkIndex)>,
    pub received: u32,
    pub progress: f64,
}

impl ResumePlan {
    /// Where a sender should restart its symbol sequence
    pub fn first_missing(&self) -> Option<ChunkIndex> {
        self.missing.first().copied()
    }
}

pub struct ResumeManager {
    store: Arc<dyn SessionStore>,
}

impl ResumeManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Reattach to a session and report its missing chunks
    ///
    /// Paused sessions are resumed; failed ones consume one retry. Completed
    /// and cancelled sessions, or sessions with nothing missing, cannot be
    /// resumed.
    ///
    /// # Arguments
    /// * `session_id` - The session to reattach to
    ///
    /// # Returns
    /// * `Ok(ResumePlan)` - The session after any state change and its missing chunk indices
    /// * `Err(Error::AlreadyComplete)` - If every chunk is already on record
    pub fn resume_transfer(&self, session_id: &str) -> Result<ResumePlan> {
        let session = self.store.load_session(session_id)?;
        match session.status {
            TransferStatus::Completed => return Err(Error::AlreadyComplete(session.id)),
            TransferStatus::Cancelled => {
                return Err(Error::InvalidTransition {
                    from: session.status.to_string(),
                    event: "resume".into(),
                })
            }
            _ => {}
        }

        let bitmap = self.store.received_bitmap(session_id)?;
        let missing = bitmap.find_missing();
        if missing.is_empty() {
            return Err(Error::AlreadyComplete(session.id));
        }

        let session = self.store.update_session(session_id, &mut |s| match s.status {
            TransferStatus::Paused => s.resume(),
            TransferStatus::Failed => {
                s.retry()?;
                s.start()
            }
            _ => Ok(()),
        })?;

        let received = bitmap.received_count();
        let progress = if session.total_chunks == 0 {
            0.0
        } else {
            received as f64 / session.total_chunks as f64 * 100.0
        };
        let gaps = bitmap.find_gaps();
        log::info!(
            "Resuming session {}: {}/{} chunks on record, {} missing in {} gaps (first {})",
            session.id,
            received,
            session.total_chunks,
            missing.len(),
            gaps.len(),
            missing[0]
        );

        Ok(ResumePlan {
            session,
            missing,
            gaps,
            received,
            progress,
        })
    }

    /// Same as [`resume_transfer`](Self::resume_transfer), located by resume token
    pub fn resume_by_token(&self, resume_token: &str) -> Result<ResumePlan> {
        let session = self
            .store
            .find_by_token(resume_token)?
            .ok_or_else(|| Error::SessionNotFound(format!("resume token {}", resume_token)))?;
        self.resume_transfer(&session.id)
    }

    pub fn resumable_sessions(&self) -> Result<Vec<TransferSession>> {
        self.store.incomplete_sessions()
    }

    pub fn missing_chunks(&self, session_id: &str) -> Result<Vec<ChunkIndex>> {
        self.store.missing_indices(session_id)
    }

    /// Pause an active session so a later process can resume it
    pub fn pause(&self, session_id: &str) -> Result<TransferSession> {
        self.store.update_session(session_id, &mut |s| s.pause())
    }

    pub fn cancel(&self, session_id: &str) -> Result<TransferSession> {
        self.store.update_session(session_id, &mut |s| s.cancel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::test_support::{chunk, session};
    use crate::session::store::MemoryStore;

    fn manager_with(total: u32, received: &[u32]) -> (ResumeManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut s = session("s", total);
        s.start().unwrap();
        store.save_session(&s).unwrap();
        for &i in received {
            store.record_received_chunk(&chunk("s", i, total)).unwrap();
        }
        (ResumeManager::new(store.clone()), store)
    }

    #[test]
    fn test_resume_reports_missing_indices() {
        let received: Vec<u32> = (0..40).collect();
        let (manager, _) = manager_with(100, &received);
        let plan = manager.resume_transfer("s").unwrap();
        assert_eq!(plan.missing, (40..100).collect::<Vec<_>>());
        assert_eq!(plan.first_missing(), Some(40));
        assert_eq!(plan.received, 40);
        assert_eq!(plan.progress, 40.0);
    }

    #[test]
    fn test_nothing_missing_is_an_error() {
        let (manager, _) = manager_with(3, &[0, 1, 2]);
        assert!(matches!(manager.resume_transfer("s"), Err(Error::AlreadyComplete(_))));
    }

    #[test]
    fn test_paused_and_failed_sessions_reactivate() {
        let (manager, store) = manager_with(4, &[1]);
        manager.pause("s").unwrap();
        let plan = manager.resume_transfer("s").unwrap();
        assert_eq!(plan.session.status, TransferStatus::Active);

        store.update_session("s", &mut |s| s.fail("lost")).unwrap();
        let plan = manager.resume_by_token("s-token").unwrap();
        assert_eq!(plan.session.status, TransferStatus::Active);
        assert_eq!(plan.session.retry_count, 1);
        assert_eq!(plan.missing, vec![0, 2, 3]);
        assert_eq!(plan.gaps, vec![(0, 0), (2, 3)]);
    }

    #[test]
    fn test_cancelled_and_unknown_sessions() {
        let (manager, _) = manager_with(4, &[]);
        manager.cancel("s").unwrap();
        assert!(matches!(
            manager.resume_transfer("s"),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            manager.resume_transfer("missing"),
            Err(Error::SessionNotFound(_))
        ));
        assert!(manager.resumable_sessions().unwrap().is_empty());
    }
}
