// Receiver pipeline: validated chunks in, verified files out

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::assembler::{assemble, AssembledFile};
use super::output::OutputWriter;
use super::recovery::RecoveryMethod;
use crate::chunking::{generate_resume_token, Chunk};
use crate::common::config::TransferConfig;
use crate::common::error::{Error, Result};
use crate::common::types::{now_millis, ChunkIndex, FileId, SessionId};
use crate::session::{SessionStore, TransferSession, TransferStatus};
use crate::validation::ChunkValidator;

/// Lifecycle of one in-flight file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Collecting,
    Assembling,
    Complete,
    Failed,
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyState::Collecting => "COLLECTING",
            AssemblyState::Assembling => "ASSEMBLING",
            AssemblyState::Complete => "COMPLETE",
            AssemblyState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A file that passed its whole-file hash check
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFile {
    pub file_id: FileId,
    pub session_id: SessionId,
    pub file_name: String,
    pub file_hash: String,
    pub data: Vec<u8>,
    /// Set when an output directory is configured
    pub path: Option<PathBuf>,
    pub repaired_chunks: Vec<ChunkIndex>,
    pub corrupt_chunks: Vec<ChunkIndex>,
    pub heuristic: Option<RecoveryMethod>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Progress { received: u32, total: u32 },
    /// Already recorded, or the file is already complete
    Duplicate,
    Complete(ReceivedFile),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub file_id: FileId,
    pub session_id: SessionId,
    pub file_name: String,
    pub state: AssemblyState,
    pub received: u32,
    pub total: u32,
}

impl TransferProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.received as f64 / self.total as f64 * 100.0
    }
}

struct Assembly {
    state: AssemblyState,
    /// Metadata shared by every chunk, payload stripped
    reference: Chunk,
    session_id: SessionId,
    chunks: BTreeMap<ChunkIndex, Chunk>,
    retries: u32,
}

impl Assembly {
    fn new(chunk: &Chunk) -> Self {
        Self {
            state: AssemblyState::Collecting,
            reference: reference_of(chunk),
            session_id: chunk.session_id.clone(),
            chunks: BTreeMap::new(),
            retries: 0,
        }
    }

    fn progress(&self) -> TransferProgress {
        TransferProgress {
            file_id: self.reference.file_id.clone(),
            session_id: self.session_id.clone(),
            file_name: self.reference.file_name.clone(),
            state: self.state,
            received: self.chunks.len() as u32,
            total: self.reference.total_chunks,
        }
    }
}

fn reference_of(chunk: &Chunk) -> Chunk {
    let mut reference = chunk.clone();
    reference.payload.clear();
    reference.parity_payload = None;
    reference
}

/// Accumulates chunks per file id and assembles each file exactly once.
///
/// `process_chunk` may be called from several threads at once. Chunks for
/// different files never contend; chunks for the same file serialize on that
/// file's lock, which also makes the assembly single-flight.
pub struct Receiver {
    config: TransferConfig,
    validator: ChunkValidator,
    transfers: DashMap<FileId, Arc<Mutex<Assembly>>>,
    store: Option<Arc<dyn SessionStore>>,
    output: Option<OutputWriter>,
}

impl Receiver {
    pub fn new(config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            validator: ChunkValidator::new(config.freshness_window, config.verify_each_chunk),
            config,
            transfers: DashMap::new(),
            store: None,
            output: None,
        })
    }

    /// Persist sessions and received chunks
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Write completed files to disk
    pub fn with_output(mut self, output: OutputWriter) -> Self {
        self.output = Some(output);
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Parse a decoded symbol string and process it
    pub fn process_wire(&self, text: &str) -> Result<ChunkOutcome> {
        self.process_chunk(Chunk::from_wire(text)?)
    }

    /// Validate, deduplicate and store one chunk, assembling when the set is complete
    ///
    /// # Arguments
    /// * `chunk` - A chunk decoded from one symbol
    ///
    /// # Returns
    /// * `Ok(ChunkOutcome::Progress)` - Stored, more chunks needed
    /// * `Ok(ChunkOutcome::Duplicate)` - Already recorded, nothing changed
    /// * `Ok(ChunkOutcome::Complete)` - This chunk completed a verified file
    /// * `Err(Error::InvalidChunk)` - Rejected; the transfer is untouched
    /// * `Err(_)` - Assembly or persistence failed
    pub fn process_chunk(&self, mut chunk: Chunk) -> Result<ChunkOutcome> {
        self.validator.validate(&chunk, now_millis())?;

        let entry = self
            .transfers
            .entry(chunk.file_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Assembly::new(&chunk))))
            .clone();
        let mut assembly = entry.lock();

        match assembly.state {
            AssemblyState::Complete | AssemblyState::Assembling => return Ok(ChunkOutcome::Duplicate),
            AssemblyState::Failed => self.restart(&mut assembly, &chunk)?,
            AssemblyState::Collecting => {}
        }
        self.validator.check_against(&chunk, &assembly.reference)?;
        if assembly.chunks.contains_key(&chunk.chunk_index) {
            log::trace!("Duplicate chunk {} of {}", chunk.chunk_index, assembly.reference.file_name);
            return Ok(ChunkOutcome::Duplicate);
        }

        // A sender restarted for the same file contributes to the existing session
        chunk.session_id = assembly.session_id.clone();
        chunk.received = true;
        chunk.verified = self.config.verify_each_chunk;
        if let Some(store) = &self.store {
            self.ensure_session(store.as_ref(), &assembly)?;
            store.record_received_chunk(&chunk)?;
        }

        log::debug!("Stored {}", chunk.chunk_info());
        assembly.chunks.insert(chunk.chunk_index, chunk);
        let received = assembly.chunks.len() as u32;
        let total = assembly.reference.total_chunks;
        if received < total {
            return Ok(ChunkOutcome::Progress { received, total });
        }

        self.finish(&mut assembly, true).map(ChunkOutcome::Complete)
    }

    /// Assemble now, before every chunk has arrived.
    ///
    /// Succeeds when erasure repair (or a confident heuristic) can fill the
    /// gaps. A failure while chunks are still missing leaves the transfer
    /// collecting.
    pub fn try_assemble(&self, file_id: &str) -> Result<ReceivedFile> {
        let entry = self
            .transfers
            .get(file_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::SessionNotFound(format!("file {}", file_id)))?;
        let mut assembly = entry.lock();
        match assembly.state {
            AssemblyState::Complete => return Err(Error::AlreadyComplete(assembly.session_id.clone())),
            AssemblyState::Failed | AssemblyState::Assembling => {
                return Err(Error::InvalidTransition {
                    from: assembly.state.to_string(),
                    event: "assemble".into(),
                })
            }
            AssemblyState::Collecting => {}
        }
        let all_received = assembly.chunks.len() as u32 >= assembly.reference.total_chunks;
        self.finish(&mut assembly, all_received)
    }

    /// Rebuild in-memory accumulation from durable chunk records
    ///
    /// Records are checked for shape and consistency but not for freshness.
    /// Returns the number of chunks restored.
    pub fn restore_from_store(&self, session_id: &str) -> Result<u32> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::ConfigError("no session store attached".into()))?;
        let session = store.load_session(session_id)?;
        match session.status {
            TransferStatus::Completed => return Err(Error::AlreadyComplete(session.id)),
            TransferStatus::Cancelled => {
                return Err(Error::InvalidTransition {
                    from: session.status.to_string(),
                    event: "restore".into(),
                })
            }
            _ => {}
        }

        let chunks = store.chunks_for_session(session_id)?;
        let first = match chunks.first() {
            Some(first) => first,
            None => return Ok(0),
        };
        let entry = self
            .transfers
            .entry(first.file_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Assembly::new(first))))
            .clone();
        let mut assembly = entry.lock();
        if assembly.state != AssemblyState::Collecting {
            return Err(Error::InvalidTransition {
                from: assembly.state.to_string(),
                event: "restore".into(),
            });
        }

        let mut restored = 0;
        for chunk in chunks {
            let checked = self
                .validator
                .validate_index(&chunk)
                .and_then(|_| self.validator.validate_shape(&chunk))
                .and_then(|_| self.validator.check_against(&chunk, &assembly.reference));
            if let Err(e) = checked {
                log::warn!("Skipping stored chunk: {}", e);
                continue;
            }
            if !assembly.chunks.contains_key(&chunk.chunk_index) {
                assembly.chunks.insert(chunk.chunk_index, chunk);
                restored += 1;
            }
        }
        log::info!(
            "Restored {} chunks for {} ({}/{})",
            restored,
            assembly.reference.file_name,
            assembly.chunks.len(),
            assembly.reference.total_chunks
        );
        Ok(restored)
    }

    pub fn progress(&self, file_id: &str) -> Option<TransferProgress> {
        self.transfers.get(file_id).map(|e| e.value().lock().progress())
    }

    pub fn state(&self, file_id: &str) -> Option<AssemblyState> {
        self.transfers.get(file_id).map(|e| e.value().lock().state)
    }

    /// Progress of every file seen so far
    pub fn transfers(&self) -> Vec<TransferProgress> {
        let entries: Vec<_> = self.transfers.iter().map(|e| Arc::clone(e.value())).collect();
        entries.iter().map(|a| a.lock().progress()).collect()
    }

    /// Drop the in-memory accumulation for a file. Durable records stay.
    pub fn forget(&self, file_id: &str) -> bool {
        self.transfers.remove(file_id).is_some()
    }

    /// Run assembly and move the transfer to its next state
    fn finish(&self, assembly: &mut Assembly, all_received: bool) -> Result<ReceivedFile> {
        assembly.state = AssemblyState::Assembling;
        log::info!(
            "Assembling {} from {}/{} chunks",
            assembly.reference.file_name,
            assembly.chunks.len(),
            assembly.reference.total_chunks
        );

        let assembled = match assemble(&assembly.reference, &assembly.chunks) {
            Ok(assembled) => assembled,
            Err(e) => {
                if all_received {
                    assembly.state = AssemblyState::Failed;
                    log::error!("Transfer of {} failed: {}", assembly.reference.file_name, e);
                    self.record_failure(&assembly.session_id, &e);
                } else {
                    assembly.state = AssemblyState::Collecting;
                    log::debug!("Early assembly not possible yet: {}", e);
                }
                return Err(e);
            }
        };

        let path = match &self.output {
            Some(output) => match output.write(&assembly.reference.file_name, &assembled.data, &assembly.reference.file_hash) {
                Ok(path) => Some(path),
                Err(e) => {
                    assembly.state = AssemblyState::Collecting;
                    return Err(e);
                }
            },
            None => None,
        };

        assembly.state = AssemblyState::Complete;
        assembly.chunks.clear();
        self.record_completion(&assembly.session_id);

        let AssembledFile {
            data,
            repaired_chunks,
            corrupt_chunks,
            heuristic,
        } = assembled;
        log::info!(
            "Received {} ({} bytes, {} chunks repaired)",
            assembly.reference.file_name,
            data.len(),
            repaired_chunks.len()
        );
        Ok(ReceivedFile {
            file_id: assembly.reference.file_id.clone(),
            session_id: assembly.session_id.clone(),
            file_name: assembly.reference.file_name.clone(),
            file_hash: assembly.reference.file_hash.clone(),
            data,
            path,
            repaired_chunks,
            corrupt_chunks,
            heuristic,
        })
    }

    /// Start collecting a failed file again, bounded by `max_retries`
    fn restart(&self, assembly: &mut Assembly, chunk: &Chunk) -> Result<()> {
        if assembly.retries >= self.config.max_retries {
            return Err(Error::InvalidTransition {
                from: AssemblyState::Failed.to_string(),
                event: format!("retry ({} of {} used)", assembly.retries, self.config.max_retries),
            });
        }
        if let Some(store) = &self.store {
            match store.update_session(&assembly.session_id, &mut |s| {
                if s.status == TransferStatus::Failed {
                    s.retry()?;
                    s.start()?;
                }
                Ok(())
            }) {
                Ok(_) => store.clear_chunks(&assembly.session_id)?,
                Err(Error::SessionNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        assembly.retries += 1;
        assembly.chunks.clear();
        assembly.reference = reference_of(chunk);
        assembly.state = AssemblyState::Collecting;
        log::info!(
            "Retrying {} (attempt {} of {})",
            assembly.reference.file_name,
            assembly.retries,
            self.config.max_retries
        );
        Ok(())
    }

    /// Create the receiving session on first contact
    fn ensure_session(&self, store: &dyn SessionStore, assembly: &Assembly) -> Result<()> {
        match store.load_session(&assembly.session_id) {
            Ok(_) => Ok(()),
            Err(Error::SessionNotFound(_)) => {
                let reference = &assembly.reference;
                let mut session = TransferSession::new(
                    assembly.session_id.clone(),
                    reference.file_id.clone(),
                    reference.file_name.clone(),
                    reference.file_size,
                    reference.file_hash.clone(),
                    reference.total_chunks,
                    generate_resume_token()?,
                );
                session.compression_enabled = reference.is_compressed;
                session.error_correction_enabled = reference.fec_scheme().is_some();
                session.code_version = reference.code_version;
                session.max_retries = self.config.max_retries;
                session.start()?;
                store.save_session(&session)
            }
            Err(e) => Err(e),
        }
    }

    fn record_completion(&self, session_id: &str) {
        let store = match &self.store {
            Some(store) => store,
            None => return,
        };
        let result = store
            .update_session(session_id, &mut |s| {
                match s.status {
                    TransferStatus::Paused => s.resume()?,
                    TransferStatus::Pending | TransferStatus::Resuming => s.start()?,
                    _ => {}
                }
                s.complete()
            })
            .and_then(|_| store.clear_chunks(session_id));
        if let Err(e) = result {
            log::error!("Could not record completion of session {}: {}", session_id, e);
        }
    }

    fn record_failure(&self, session_id: &str, error: &Error) {
        let store = match &self.store {
            Some(store) => store,
            None => return,
        };
        let message = error.to_string();
        let result = store.update_session(session_id, &mut |s| {
            match s.status {
                TransferStatus::Paused => s.resume()?,
                TransferStatus::Pending => s.start()?,
                _ => {}
            }
            s.fail(message.clone())
        });
        if let Err(e) = result {
            log::error!("Could not record failure of session {}: {}", session_id, e);
        }
    }
}
