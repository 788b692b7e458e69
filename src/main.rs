// Main entry point for the application

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use qrxfer::chunking::Chunk;
use qrxfer::common::config::TransferConfig;
use qrxfer::common::types::now_millis;
use qrxfer::receiver::{AssemblyState, ChunkOutcome, OutputWriter, ReceivedFile, Receiver};
use qrxfer::scheduler::{CyclePolicy, RenderHint, Scheduler, StopReason, SymbolRenderer};
use qrxfer::sender::{EncodedTransfer, Encoder};
use qrxfer::session::{FileStore, ResumeManager, SessionStore, TransferStatus};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "qrxfer")]
#[command(about = "One-way file transfer over sequences of QR symbols", long_about = None)]
struct Cli {
    /// Configuration preset: fast, balanced, high-reliability
    #[arg(long, global = true, default_value = "balanced")]
    preset: String,

    /// JSON configuration file, overrides --preset
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session store directory
    #[arg(long, global = true)]
    session_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file and print its chunk plan
    Encode {
        /// File to encode
        file: PathBuf,

        /// Write one payload per line here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show a file's payloads at the configured cadence
    Transmit {
        /// File to send
        file: PathBuf,

        /// Payload sink, one per line (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Stop after this many passes (default: the configured cycle policy)
        #[arg(long)]
        passes: Option<u32>,

        /// Chunk index to begin at
        #[arg(long, default_value_t = 0)]
        start: u32,
    },

    /// Read decoded payloads, one per line, and rebuild files
    Receive {
        /// Payload source (default: stdin)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Directory for received files
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// List stored sessions
    Sessions,

    /// Show what a session still needs, and optionally continue transmitting it
    Resume {
        /// Session id or resume token
        session: String,

        /// Source file to transmit from the first missing chunk
        #[arg(long)]
        file: Option<PathBuf>,

        /// Payload sink, one per line (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        passes: Option<u32>,
    },

    /// Delete finished sessions older than the retention window
    Gc {
        /// Retention in days (default: from the configuration)
        #[arg(long)]
        days: Option<u64>,
    },
}

/// Stand-in for a display: one payload string per line
struct LineRenderer<W: Write> {
    sink: W,
    progress: ProgressBar,
}

impl<W: Write> SymbolRenderer for LineRenderer<W> {
    fn render(&mut self, payload: &str, hint: &RenderHint) -> qrxfer::Result<()> {
        writeln!(self.sink, "{}", payload)?;
        self.sink.flush()?;
        self.progress.set_position(hint.chunk_index as u64 + 1);
        self.progress.set_message(format!("v{}{}", hint.version, hint.level));
        Ok(())
    }
}

fn load_config(cli: &Cli) -> Result<TransferConfig> {
    let mut config = match &cli.config {
        Some(path) => TransferConfig::load(path)?,
        None => TransferConfig::preset(&cli.preset)?,
    };
    if let Some(dir) = &cli.session_dir {
        config = config.with_session_dir(dir.clone());
    }
    Ok(config)
}

fn open_store(config: &TransferConfig) -> Result<Arc<dyn SessionStore>> {
    Ok(Arc::new(FileStore::open(&config.session_dir)?))
}

fn open_sink(out: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match out {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    })
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>12} [{bar:40}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn print_summary(encoded: &EncodedTransfer) {
    let session = &encoded.session;
    eprintln!("File:        {} ({} bytes)", session.file_name, session.file_size);
    eprintln!("Session:     {}", session.id);
    eprintln!("Resume:      {}", session.resume_token);
    eprintln!(
        "Symbols:     version {} level {} ({} bytes capacity, ~{} px)",
        encoded.plan.version,
        encoded.plan.level,
        encoded.symbol_capacity(),
        encoded.plan.estimated_symbol_pixel_size
    );
    eprintln!(
        "Chunks:      {} ({} data, {} parity) of {} bytes",
        encoded.total_chunks(),
        encoded.data_chunks,
        encoded.parity_chunks(),
        encoded.plan.chunk_size
    );
    eprintln!(
        "Compression: {} ({:.2}:1)",
        encoded.compression_algorithm, encoded.compression_ratio
    );
}

fn transmit(
    encoded: &EncodedTransfer,
    config: &TransferConfig,
    store: Arc<dyn SessionStore>,
    out: Option<&Path>,
    passes: Option<u32>,
    start: u32,
) -> Result<()> {
    let mut scheduler = Scheduler::new(encoded, config)?
        .with_store(store, encoded.session.id.clone())
        .starting_at(start)?;
    if let Some(passes) = passes {
        scheduler = scheduler.with_cycle_policy(CyclePolicy::Passes(passes));
    }

    let progress = ProgressBar::new(encoded.total_chunks() as u64);
    progress.set_style(bar_style());
    progress.set_prefix("transmit");
    let mut renderer = LineRenderer {
        sink: open_sink(out)?,
        progress: progress.clone(),
    };

    let reason = scheduler.run(&mut renderer)?;
    progress.finish();
    let stats = scheduler.stats();
    match reason {
        StopReason::Finished => eprintln!(
            "Finished {} passes, {} symbols shown",
            stats.completed_passes, stats.displayed
        ),
        StopReason::Stopped => eprintln!("Stopped at chunk {}", stats.current_index),
    }
    Ok(())
}

fn receive(config: &TransferConfig, input: Option<&Path>, output_dir: PathBuf) -> Result<()> {
    let store = open_store(config)?;
    let receiver = Receiver::new(config.clone())?
        .with_store(Arc::clone(&store))
        .with_output(OutputWriter::new(output_dir));

    for session in store.incomplete_sessions()? {
        match receiver.restore_from_store(&session.id) {
            Ok(0) => {}
            Ok(count) => log::info!("Continuing {} with {} stored chunks", session.file_name, count),
            Err(e) => log::warn!("Cannot restore session {}: {}", session.id, e),
        }
    }

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let bars = MultiProgress::new();
    let mut progress: HashMap<String, ProgressBar> = HashMap::new();
    let mut received: Vec<ReceivedFile> = Vec::new();
    let mut rejected = 0u64;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk = match Chunk::from_wire(&line) {
            Ok(chunk) => chunk,
            Err(e) => {
                rejected += 1;
                log::debug!("Dropped payload: {}", e);
                continue;
            }
        };
        let file_id = chunk.file_id.clone();
        match receiver.process_chunk(chunk) {
            Ok(ChunkOutcome::Progress { received: count, total }) => {
                let bar = progress.entry(file_id.clone()).or_insert_with(|| {
                    let bar = bars.add(ProgressBar::new(total as u64));
                    bar.set_style(bar_style());
                    bar.set_prefix("receive");
                    if let Some(p) = receiver.progress(&file_id) {
                        bar.set_message(p.file_name);
                    }
                    bar
                });
                bar.set_position(count as u64);
            }
            Ok(ChunkOutcome::Duplicate) => {}
            Ok(ChunkOutcome::Complete(file)) => {
                if let Some(bar) = progress.remove(&file.file_id) {
                    bar.finish_and_clear();
                }
                received.push(file);
            }
            Err(e) if e.is_fatal_to_transfer() => eprintln!("Transfer failed: {}", e),
            Err(e) => {
                rejected += 1;
                log::debug!("Dropped payload: {}", e);
            }
        }
    }

    // The stream ended; try parity repair on anything still short
    for transfer in receiver.transfers() {
        if transfer.state != AssemblyState::Collecting {
            continue;
        }
        match receiver.try_assemble(&transfer.file_id) {
            Ok(file) => received.push(file),
            Err(e) => eprintln!(
                "{}: {}/{} chunks, not recoverable yet ({})",
                transfer.file_name, transfer.received, transfer.total, e
            ),
        }
    }
    for bar in progress.values() {
        bar.abandon();
    }

    for file in &received {
        let location = file
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        eprintln!("Received {} ({} bytes) -> {}", file.file_name, file.data.len(), location);
        if !file.repaired_chunks.is_empty() {
            eprintln!("  rebuilt chunks {:?} from parity", file.repaired_chunks);
        }
        if let Some(method) = file.heuristic {
            eprintln!("  damaged spans filled by {}", method);
        }
    }
    if rejected > 0 {
        eprintln!("{} payloads rejected", rejected);
    }
    Ok(())
}

fn list_sessions(store: &dyn SessionStore) -> Result<()> {
    let mut sessions = store.list_sessions()?;
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for session in &sessions {
        println!(
            "{}  {:<10} {:>5.1}% rx {:>5.1}% tx  {:>8}  {}",
            session.id,
            session.status,
            session.receive_progress(),
            session.transmit_progress(),
            session.formatted_duration(),
            session.file_name
        );
        if let Some(message) = &session.error_message {
            println!("    {}", message);
        }
    }
    let counts = store.count_by_status()?;
    let summary: Vec<String> = TransferStatus::ALL
        .iter()
        .filter_map(|s| counts.get(s).map(|n| format!("{} {}", n, s)))
        .collect();
    println!("\n{}", summary.join(", "));
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Encode { file, out } => {
            let encoded = Encoder::new(config.clone())?.encode_file(file)?;
            print_summary(&encoded);
            let store = open_store(&config)?;
            store.save_session(&encoded.session)?;
            if let Some(out) = out {
                let mut sink = open_sink(Some(out))?;
                for payload in encoded.wire_payloads()? {
                    writeln!(sink, "{}", payload)?;
                }
                sink.flush()?;
                eprintln!("Payloads:    {}", out.display());
            }
        }

        Commands::Transmit { file, out, passes, start } => {
            let encoded = Encoder::new(config.clone())?.encode_file(file)?;
            print_summary(&encoded);
            let store = open_store(&config)?;
            store.save_session(&encoded.session)?;
            transmit(&encoded, &config, store, out.as_deref(), *passes, *start)?;
        }

        Commands::Receive { input, output_dir } => {
            let output_dir = output_dir.clone().unwrap_or_else(|| config.output_dir.clone());
            receive(&config, input.as_deref(), output_dir)?;
        }

        Commands::Sessions => {
            let store = open_store(&config)?;
            list_sessions(store.as_ref())?;
        }

        Commands::Resume { session, file, out, passes } => {
            let store = open_store(&config)?;
            let manager = ResumeManager::new(Arc::clone(&store));
            let plan = match store.find_by_token(session)? {
                Some(found) => manager.resume_transfer(&found.id)?,
                None => manager.resume_transfer(session)?,
            };
            eprintln!(
                "Session {} ({}): {} of {} chunks on record, {} missing",
                plan.session.id,
                plan.session.file_name,
                plan.received,
                plan.session.total_chunks,
                plan.missing.len()
            );

            if let Some(file) = file {
                let mut encoded = Encoder::new(config.clone())?.encode_file(file)?;
                encoded.rebind(plan.session.clone())?;
                let start = plan.first_missing().unwrap_or(0);
                transmit(&encoded, &config, store, out.as_deref(), *passes, start)?;
            } else {
                let preview: Vec<String> = plan.missing.iter().take(20).map(|i| i.to_string()).collect();
                println!("{}", preview.join(" "));
            }
        }

        Commands::Gc { days } => {
            let store = open_store(&config)?;
            let retention = days
                .map(|d| Duration::from_secs(d * 24 * 60 * 60))
                .unwrap_or(config.retention);
            let purged = store.purge_expired(retention, now_millis())?;
            eprintln!("Removed {} sessions", purged);
        }
    }

    Ok(())
}
