// Transmission loop handing chunks to the renderer at an adaptive cadence

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use super::cadence::{symbol_complexity, CadenceController};
use crate::capacity;
use crate::common::config::TransferConfig;
use crate::common::error::{Error, Result};
use crate::chunking::Chunk;
use crate::common::types::{now_millis, ChunkIndex, ErrorLevel, SessionId};
use crate::sender::EncodedTransfer;
use crate::session::{SessionStore, TransferStatus};

/// How many times the chunk sequence is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CyclePolicy {
    /// Until stopped from outside
    #[default]
    Forever,
    Once,
    Passes(u32),
}

impl CyclePolicy {
    /// Whether `completed` full passes end the loop
    pub fn is_done(self, completed: u32) -> bool {
        match self {
            CyclePolicy::Forever => false,
            CyclePolicy::Once => completed >= 1,
            CyclePolicy::Passes(n) => completed >= n.max(1),
        }
    }
}

impl fmt::Display for CyclePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePolicy::Forever => write!(f, "forever"),
            CyclePolicy::Once => write!(f, "once"),
            CyclePolicy::Passes(n) => write!(f, "{} passes", n),
        }
    }
}

/// What the renderer needs besides the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderHint {
    pub chunk_index: ChunkIndex,
    pub total_chunks: u32,
    pub level: ErrorLevel,
    pub version: u8,
    pub pixel_size: u32,
}

/// Turns one payload string into a displayed symbol
pub trait SymbolRenderer {
    fn render(&mut self, payload: &str, hint: &RenderHint) -> Result<()>;
}

impl<F> SymbolRenderer for F
where
    F: FnMut(&str, &RenderHint) -> Result<()>,
{
    fn render(&mut self, payload: &str, hint: &RenderHint) -> Result<()> {
        self(payload, hint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Pause,
    Resume,
    Stop,
    JumpTo(ChunkIndex),
    ReportScan { latency: Duration, success: bool },
}

/// Controls a running scheduler from another thread
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: Sender<Command>,
}

impl SchedulerHandle {
    fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(Command::Resume)
    }

    /// Takes effect before the next chunk is handed off
    pub fn stop(&self) -> bool {
        self.send(Command::Stop)
    }

    /// Show `index` next. Out-of-range indices are ignored by the loop.
    pub fn jump_to(&self, index: ChunkIndex) -> bool {
        self.send(Command::JumpTo(index))
    }

    pub fn report_scan(&self, latency: Duration, success: bool) -> bool {
        self.send(Command::ReportScan { latency, success })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped through a handle
    Stopped,
    /// The cycle policy ran out of passes
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStats {
    pub total_chunks: u32,
    pub current_index: ChunkIndex,
    pub completed_passes: u32,
    pub displayed: u64,
    pub paused: bool,
    pub success_rate: f64,
    pub average_scan_time: Option<Duration>,
    pub current_interval: Duration,
    /// Time to finish the current pass at the current interval
    pub estimated_remaining: Duration,
}

/// Single-threaded loop over a transfer's chunks.
///
/// Each chunk is stamped with the current time as it is rendered, so a
/// receiver's freshness window measures the age of the frame it scanned
/// rather than the age of the encoding. The wait between two symbols is the only suspension point. Commands sent
/// through a [`SchedulerHandle`] are applied as soon as they arrive, and a
/// stop never interrupts a render in progress.
pub struct Scheduler {
    chunks: Vec<Chunk>,
    level: ErrorLevel,
    capacity: usize,
    pixel_size: u32,
    cadence: CadenceController,
    policy: CyclePolicy,
    position: usize,
    jump: Option<usize>,
    completed_passes: u32,
    displayed: u64,
    paused: bool,
    interval: Duration,
    commands: Receiver<Command>,
    sender: Sender<Command>,
    store: Option<(Arc<dyn SessionStore>, SessionId)>,
}

enum Flow {
    Continue,
    Stop,
}

impl Scheduler {
    pub fn new(transfer: &EncodedTransfer, config: &TransferConfig) -> Result<Self> {
        if transfer.chunks.is_empty() {
            return Err(Error::ConfigError("nothing to transmit".into()));
        }
        let (sender, commands) = unbounded();
        Ok(Self {
            chunks: transfer.chunks.clone(),
            level: transfer.plan.level,
            capacity: transfer.symbol_capacity(),
            pixel_size: transfer.plan.estimated_symbol_pixel_size,
            cadence: CadenceController::new(config),
            policy: config.cycle_policy,
            position: 0,
            jump: None,
            completed_passes: 0,
            displayed: 0,
            paused: false,
            interval: config.display_duration,
            commands,
            sender,
            store: None,
        })
    }

    /// Record transmitted chunks against a stored session
    pub fn with_store(mut self, store: Arc<dyn SessionStore>, session_id: SessionId) -> Self {
        self.store = Some((store, session_id));
        self
    }

    /// Begin at `index` instead of zero, e.g. the first chunk a resume plan reports missing
    pub fn starting_at(mut self, index: ChunkIndex) -> Result<Self> {
        if index as usize >= self.chunks.len() {
            return Err(Error::ConfigError(format!(
                "Start index {} outside 0..{}",
                index,
                self.chunks.len()
            )));
        }
        self.position = index as usize;
        Ok(self)
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            commands: self.sender.clone(),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let total = self.chunks.len() as u32;
        let remaining = total.saturating_sub(self.position as u32);
        SchedulerStats {
            total_chunks: total,
            current_index: self.position as ChunkIndex,
            completed_passes: self.completed_passes,
            displayed: self.displayed,
            paused: self.paused,
            success_rate: self.cadence.success_rate(),
            average_scan_time: self.cadence.average_latency(),
            current_interval: self.interval,
            estimated_remaining: capacity::estimate_transmission_time(
                remaining,
                self.interval,
                Duration::ZERO,
            ),
        }
    }

    /// Drive the loop until stopped or the cycle policy is exhausted
    ///
    /// # Arguments
    /// * `renderer` - Receives each payload in turn
    ///
    /// # Returns
    /// * `Ok(StopReason)` - Why the loop ended
    /// * `Err(Error)` - The renderer or the session store failed
    pub fn run(&mut self, renderer: &mut dyn SymbolRenderer) -> Result<StopReason> {
        self.update_session(|status| match status {
            TransferStatus::Pending | TransferStatus::Resuming => Some(TransferStatus::Active),
            TransferStatus::Paused => Some(TransferStatus::Active),
            _ => None,
        })?;
        log::info!(
            "Transmitting {} chunks from index {} ({})",
            self.chunks.len(),
            self.position,
            self.policy
        );

        loop {
            while let Ok(command) = self.commands.try_recv() {
                if let Flow::Stop = self.apply(command) {
                    return self.stopped();
                }
            }
            if self.paused {
                // Blocks until a command arrives; the scheduler holds a sender so this never disconnects
                match self.commands.recv() {
                    Ok(command) => {
                        if let Flow::Stop = self.apply(command) {
                            return self.stopped();
                        }
                    }
                    Err(_) => return self.stopped(),
                }
                continue;
            }

            let index = self.position;
            let total_chunks = self.chunks.len() as u32;
            let chunk = &mut self.chunks[index];
            chunk.timestamp = now_millis();
            let payload = chunk.to_wire()?;
            let hint = RenderHint {
                chunk_index: index as ChunkIndex,
                total_chunks,
                level: self.level,
                version: chunk.code_version,
                pixel_size: self.pixel_size,
            };
            renderer.render(&payload, &hint)?;
            self.displayed += 1;
            self.record_transmitted(index as ChunkIndex)?;

            let complexity = symbol_complexity(payload.len(), self.capacity, hint.version);
            self.interval = self.cadence.next_interval(complexity);
            log::trace!("Chunk {} shown, next in {:?}", index, self.interval);

            if let Flow::Stop = self.wait(self.interval) {
                return self.stopped();
            }
            if self.advance() {
                log::info!("Finished {} passes over {} chunks", self.completed_passes, self.chunks.len());
                return Ok(StopReason::Finished);
            }
        }
    }

    /// Sleep for `interval` while still reacting to commands
    fn wait(&mut self, interval: Duration) -> Flow {
        let deadline = Instant::now() + interval;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Flow::Continue;
            }
            match self.commands.recv_timeout(deadline - now) {
                Ok(command) => {
                    if let Flow::Stop = self.apply(command) {
                        return Flow::Stop;
                    }
                    if self.paused {
                        return Flow::Continue;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Flow::Continue
                }
            }
        }
    }

    /// Move to the next chunk. Returns true when the cycle policy is done.
    fn advance(&mut self) -> bool {
        if let Some(target) = self.jump.take() {
            self.position = target;
            return false;
        }
        self.position += 1;
        if self.position == self.chunks.len() {
            self.position = 0;
            self.completed_passes += 1;
            return self.policy.is_done(self.completed_passes);
        }
        false
    }

    fn apply(&mut self, command: Command) -> Flow {
        match command {
            Command::Pause => {
                log::debug!("Transmission paused at chunk {}", self.position);
                self.paused = true;
            }
            Command::Resume => self.paused = false,
            Command::Stop => return Flow::Stop,
            Command::JumpTo(index) => {
                if (index as usize) < self.chunks.len() {
                    if self.paused || self.displayed == 0 {
                        self.position = index as usize;
                    } else {
                        self.jump = Some(index as usize);
                    }
                } else {
                    log::warn!("Ignoring jump to {} of {}", index, self.chunks.len());
                }
            }
            Command::ReportScan { latency, success } => self.cadence.record_scan(latency, success),
        }
        Flow::Continue
    }

    fn stopped(&mut self) -> Result<StopReason> {
        log::info!("Transmission stopped at chunk {}", self.position);
        self.update_session(|status| match status {
            TransferStatus::Active => Some(TransferStatus::Paused),
            _ => None,
        })?;
        Ok(StopReason::Stopped)
    }

    fn record_transmitted(&self, index: ChunkIndex) -> Result<()> {
        if let Some((store, session_id)) = &self.store {
            store.update_session(session_id, &mut |s| {
                s.record_transmitted(index);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Move the stored session to the status `next` picks, if any
    fn update_session(&self, next: impl Fn(TransferStatus) -> Option<TransferStatus>) -> Result<()> {
        if let Some((store, session_id)) = &self.store {
            store.update_session(session_id, &mut |s| {
                match next(s.status) {
                    Some(TransferStatus::Active) if s.status == TransferStatus::Paused => {
                        s.resume()?;
                    }
                    Some(TransferStatus::Active) => {
                        s.start()?;
                    }
                    Some(TransferStatus::Paused) => {
                        s.pause()?;
                    }
                    _ => {}
                }
                Ok(())
            })?;
        }
        Ok(())
    }
}
