// JSON-per-record session store on the local filesystem

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::model::TransferSession;
use super::store::{check_chunk_for_session, has_flag, set_flag, ChunkFlag, ReceiptUpdate, SessionStore};
use crate::chunking::Chunk;
use crate::common::error::{Error, Result};
use crate::common::types::{ChunkIndex, MAX_ID_LEN};

/// Layout under the root directory:
///
/// ```text
/// <root>/<session_id>.json
/// <root>/<session_id>.chunks/<index>.json
/// ```
///
/// Every write goes to a temporary file first and is renamed into place, so
/// a crash leaves either the old record or the new one.
pub struct FileStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| Error::Storage(format!("{}: {}", root.display(), e)))?;
        log::debug!("Session store at {}", root.display());
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}.json", path_component(session_id)?)))
    }

    fn chunk_dir(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}.chunks", path_component(session_id)?)))
    }

    fn chunk_path(&self, session_id: &str, chunk_index: ChunkIndex) -> Result<PathBuf> {
        Ok(self.chunk_dir(session_id)?.join(format!("{}.json", chunk_index)))
    }

    fn read_session(&self, session_id: &str) -> Result<TransferSession> {
        let path = self.session_path(session_id)?;
        if !path.exists() {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        read_json(&path)
    }

    fn read_chunk(&self, session_id: &str, chunk_index: ChunkIndex) -> Result<Option<Chunk>> {
        let path = self.chunk_path(session_id, chunk_index)?;
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn read_chunks(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let dir = self.chunk_dir(session_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut chunks = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| storage_error(&dir, e))? {
            let path = entry.map_err(|e| storage_error(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            chunks.push(read_json::<Chunk>(&path)?);
        }
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }
}

/// Session ids become file names, so only `[A-Za-z0-9_-]` is allowed
fn path_component(session_id: &str) -> Result<&str> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(Error::Storage(format!("Invalid session id {:?}", session_id)));
    }
    Ok(session_id)
}

fn storage_error(path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("{}: {}", path.display(), e))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path).map_err(|e| storage_error(path, e))?;
    serde_json::from_str(&json)
        .map_err(|e| Error::DeserializationError(format!("{}: {}", path.display(), e)))
}

/// Write to `<path>.tmp` then rename over `path`
fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| storage_error(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::SerializationError(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| storage_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| storage_error(path, e))?;
    Ok(())
}

impl SessionStore for FileStore {
    fn save_session(&self, session: &TransferSession) -> Result<()> {
        let _guard = self.lock.lock();
        write_json(&self.session_path(&session.id)?, session)
    }

    fn load_session(&self, session_id: &str) -> Result<TransferSession> {
        let _guard = self.lock.lock();
        self.read_session(session_id)
    }

    fn list_sessions(&self) -> Result<Vec<TransferSession>> {
        let _guard = self.lock.lock();
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| storage_error(&self.root, e))? {
            let path = entry.map_err(|e| storage_error(&self.root, e))?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<TransferSession>(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => log::warn!("Skipping unreadable session record: {}", e),
            }
        }
        Ok(sessions)
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.session_path(session_id)?;
        if path.exists() {
            fs::remove_file(&path).map_err(|e| storage_error(&path, e))?;
        }
        let dir = self.chunk_dir(session_id)?;
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;
        }
        Ok(())
    }

    fn update_session(
        &self,
        session_id: &str,
        update: &mut dyn FnMut(&mut TransferSession) -> Result<()>,
    ) -> Result<TransferSession> {
        let _guard = self.lock.lock();
        let mut session = self.read_session(session_id)?;
        update(&mut session)?;
        write_json(&self.session_path(session_id)?, &session)?;
        Ok(session)
    }

    fn clear_chunks(&self, session_id: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let dir = self.chunk_dir(session_id)?;
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;
        }
        Ok(())
    }

    fn record_received_chunk(&self, chunk: &Chunk) -> Result<ReceiptUpdate> {
        let _guard = self.lock.lock();
        let mut session = self.read_session(&chunk.session_id)?;
        check_chunk_for_session(chunk, &session)?;

        let path = self.chunk_path(&chunk.session_id, chunk.chunk_index)?;
        let newly_recorded = !path.exists();
        if newly_recorded {
            let mut record = chunk.clone();
            record.received = true;
            write_json(&path, &record)?;
            session.chunks_received = (session.chunks_received + 1).min(session.total_chunks);
            session.touch();
            write_json(&self.session_path(&session.id)?, &session)?;
        }
        Ok(ReceiptUpdate {
            newly_recorded,
            received: session.chunks_received,
            total: session.total_chunks,
        })
    }

    fn chunks_for_session(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let _guard = self.lock.lock();
        self.read_chunks(session_id)
    }

    fn mark_chunk(&self, session_id: &str, chunk_index: ChunkIndex, flag: ChunkFlag) -> Result<bool> {
        let _guard = self.lock.lock();
        match self.read_chunk(session_id, chunk_index)? {
            Some(mut record) => {
                set_flag(&mut record, flag);
                write_json(&self.chunk_path(session_id, chunk_index)?, &record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count_chunks(&self, session_id: &str, flag: ChunkFlag) -> Result<u32> {
        let _guard = self.lock.lock();
        Ok(self
            .read_chunks(session_id)?
            .iter()
            .filter(|c| has_flag(c, flag))
            .count() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::test_support::{chunk, exercise_store, session};
    use tempfile::TempDir;

    #[test]
    fn test_file_store_contract() {
        let dir = TempDir::new().unwrap();
        exercise_store(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.save_session(&session("s", 4)).unwrap();
            store.record_received_chunk(&chunk("s", 2, 4)).unwrap();
            store.record_received_chunk(&chunk("s", 0, 4)).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let loaded = store.load_session("s").unwrap();
        assert_eq!(loaded.chunks_received, 2);
        assert_eq!(store.missing_indices("s").unwrap(), vec![1, 3]);
        assert!(store.chunks_for_session("s").unwrap().iter().all(|c| c.received));
        assert!(!dir.path().join("s.json.tmp").exists());
    }

    #[test]
    fn test_ids_cannot_leave_the_root() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("store")).unwrap();

        for id in ["../escaped", "a/b", "", ".."] {
            assert!(matches!(
                store.save_session(&session(id, 1)),
                Err(Error::Storage(_))
            ));
            assert!(store.load_session(id).is_err());
            assert!(store.record_received_chunk(&chunk(id, 0, 1)).is_err());
        }
        assert!(!dir.path().join("escaped.json").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(store.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_session_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save_session(&session("good", 1)).unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(matches!(
            store.load_session("broken"),
            Err(Error::DeserializationError(_))
        ));
    }
}
