// Transfer session record and its state machine

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::error::{Error, Result};
use crate::common::types::{now_millis, ChunkIndex, FileId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Resuming,
    Cancelled,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 7] = [
        TransferStatus::Pending,
        TransferStatus::Active,
        TransferStatus::Paused,
        TransferStatus::Completed,
        TransferStatus::Failed,
        TransferStatus::Resuming,
        TransferStatus::Cancelled,
    ];

    /// Completed and cancelled sessions never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Active => "ACTIVE",
            TransferStatus::Paused => "PAUSED",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
            TransferStatus::Resuming => "RESUMING",
            TransferStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Inputs to the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Pause,
    Resume,
    Complete,
    Fail,
    Retry,
    Cancel,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::Start => "start",
            SessionEvent::Pause => "pause",
            SessionEvent::Resume => "resume",
            SessionEvent::Complete => "complete",
            SessionEvent::Fail => "fail",
            SessionEvent::Retry => "retry",
            SessionEvent::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Next state for `event` in `from`, if the transition exists
pub fn next_status(from: TransferStatus, event: SessionEvent) -> Option<TransferStatus> {
    use SessionEvent::*;
    use TransferStatus::*;
    match (from, event) {
        (Pending | Resuming, Start) => Some(Active),
        (Active, Pause) => Some(Paused),
        (Paused, Resume) => Some(Active),
        (Active, Complete) => Some(Completed),
        (Active | Resuming, Fail) => Some(Failed),
        (Failed, Retry) => Some(Resuming),
        (s, Cancel) if !s.is_terminal() => Some(Cancelled),
        _ => None,
    }
}

/// One file transfer attempt, as persisted by the session store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSession {
    pub id: SessionId,
    pub file_id: FileId,
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    pub total_chunks: u32,
    pub chunks_transmitted: u32,
    pub chunks_received: u32,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub status: TransferStatus,
    pub compression_enabled: bool,
    pub error_correction_enabled: bool,
    pub code_version: u8,
    pub last_chunk_index: Option<ChunkIndex>,
    pub resume_token: String,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Whole-file hash checked after assembly
    #[serde(default)]
    pub file_verified: bool,
    pub updated_at: u64,
}

impl TransferSession {
    pub fn new(
        id: SessionId,
        file_id: FileId,
        file_name: String,
        file_size: u64,
        file_hash: String,
        total_chunks: u32,
        resume_token: String,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            file_id,
            file_name,
            file_size,
            file_hash,
            total_chunks,
            chunks_transmitted: 0,
            chunks_received: 0,
            start_time: now,
            end_time: None,
            status: TransferStatus::Pending,
            compression_enabled: false,
            error_correction_enabled: false,
            code_version: 1,
            last_chunk_index: None,
            resume_token,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            file_verified: false,
            updated_at: now,
        }
    }

    /// Apply a state machine event
    pub fn apply(&mut self, event: SessionEvent) -> Result<TransferStatus> {
        let next = next_status(self.status, event).ok_or_else(|| Error::InvalidTransition {
            from: self.status.to_string(),
            event: event.to_string(),
        })?;
        if event == SessionEvent::Retry && !self.can_retry() {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                event: format!("retry ({} of {} used)", self.retry_count, self.max_retries),
            });
        }

        match event {
            SessionEvent::Retry => {
                self.retry_count += 1;
                self.error_message = None;
            }
            SessionEvent::Complete | SessionEvent::Cancel => self.end_time = Some(now_millis()),
            _ => {}
        }
        log::debug!("Session {}: {} -> {} ({})", self.id, self.status, next, event);
        self.status = next;
        self.touch();
        Ok(next)
    }

    pub fn start(&mut self) -> Result<()> {
        self.apply(SessionEvent::Start).map(|_| ())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.apply(SessionEvent::Pause).map(|_| ())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.apply(SessionEvent::Resume).map(|_| ())
    }

    /// Mark the file assembled and its hash verified. Chunks rebuilt from
    /// parity count as received.
    pub fn complete(&mut self) -> Result<()> {
        self.apply(SessionEvent::Complete)?;
        self.chunks_received = self.total_chunks;
        self.file_verified = true;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.apply(SessionEvent::Fail)?;
        self.error_message = Some(message.into());
        self.end_time = Some(now_millis());
        Ok(())
    }

    /// Failed to resuming, bounded by `max_retries`
    pub fn retry(&mut self) -> Result<()> {
        self.apply(SessionEvent::Retry)?;
        self.end_time = None;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.apply(SessionEvent::Cancel).map(|_| ())
    }

    pub fn can_retry(&self) -> bool {
        self.status == TransferStatus::Failed && self.retry_count < self.max_retries
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Note a chunk handed to the renderer
    pub fn record_transmitted(&mut self, chunk_index: ChunkIndex) {
        self.chunks_transmitted = (self.chunks_transmitted + 1).min(self.total_chunks);
        self.last_chunk_index = Some(chunk_index);
        self.touch();
    }

    /// Sender progress, percent
    pub fn transmit_progress(&self) -> f64 {
        percent(self.chunks_transmitted, self.total_chunks)
    }

    /// Receiver progress, percent
    pub fn receive_progress(&self) -> f64 {
        percent(self.chunks_received, self.total_chunks)
    }

    pub fn duration(&self) -> Duration {
        let end = self.end_time.unwrap_or_else(now_millis);
        Duration::from_millis(end.saturating_sub(self.start_time))
    }

    pub fn formatted_duration(&self) -> String {
        let seconds = self.duration().as_secs();
        if seconds >= 3600 {
            format!("{}h {}m {}s", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
        } else if seconds >= 60 {
            format!("{}m {}s", seconds / 60, seconds % 60)
        } else {
            format!("{}s", seconds)
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

fn percent(part: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}
