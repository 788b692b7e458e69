// Sender pipeline: file bytes to an ordered chunk sequence

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::capacity::{self, CapacityPlan, PlanConstraints, DEFAULT_MAX_PIXELS};
use crate::chunking::{generate_resume_token, generate_session_id, Chunk, ChunkFramer, ChunkHasher, FrameHeader};
use crate::common::config::{CompressionMode, TransferConfig};
use crate::common::error::{Error, Result};
use crate::common::types::MIN_CHUNK_SIZE;
use crate::compression::{self, CompressionAlgorithm, CompressionOutcome};
use crate::fec::{encode_stream, FecScheme, StripeLayout};
use crate::session::TransferSession;
use crate::validation::sanitize_file_name;

/// Everything produced for one file
#[derive(Debug, Clone)]
pub struct EncodedTransfer {
    pub chunks: Vec<Chunk>,
    /// Status `PENDING`, `total_chunks == chunks.len()`
    pub session: TransferSession,
    pub plan: CapacityPlan,
    pub compression_algorithm: CompressionAlgorithm,
    pub compression_ratio: f64,
    /// Length of the processed stream carried by the data chunks
    pub data_length: u64,
    pub data_chunks: u32,
    pub fec: Option<FecScheme>,
}

impl EncodedTransfer {
    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn parity_chunks(&self) -> u32 {
        self.total_chunks() - self.data_chunks
    }

    /// Wire strings in chunk order
    pub fn wire_payloads(&self) -> Result<Vec<String>> {
        self.chunks.iter().map(Chunk::to_wire).collect()
    }

    /// Symbol capacity available to each wire string
    pub fn symbol_capacity(&self) -> usize {
        capacity::capacity(self.plan.version, self.plan.level)
    }

    /// Carry a stored session's id instead of the fresh one, for resuming
    ///
    /// The stored session must describe the same file and chunk count.
    pub fn rebind(&mut self, session: TransferSession) -> Result<()> {
        if session.file_id != self.session.file_id
            || session.file_hash != self.session.file_hash
            || session.total_chunks != self.total_chunks()
        {
            return Err(Error::ConfigError(format!(
                "Session {} does not match this encoding of {}",
                session.id, self.session.file_name
            )));
        }
        for chunk in &mut self.chunks {
            chunk.session_id = session.id.clone();
        }
        self.session = session;
        Ok(())
    }
}

/// Turns files into chunk sequences under one configuration
pub struct Encoder {
    config: TransferConfig,
}

impl Encoder {
    pub fn new(config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Read and encode a file from disk
    pub fn encode_file(&self, path: &Path) -> Result<EncodedTransfer> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = fs::read(path)?;
        self.encode_bytes(&name, &bytes, modified_ms)
    }

    /// Encode an in-memory file
    ///
    /// # Arguments
    /// * `file_name` - Name sent to the receiver, sanitized before use
    /// * `data` - File contents
    /// * `modified_ms` - Modification time folded into the file id
    ///
    /// # Returns
    /// * `Ok(EncodedTransfer)` - The chunks and a `PENDING` session
    /// * `Err(Error::EmptyFile)` - If `data` is empty
    /// * `Err(Error::Capacity)` - If no symbol in range can carry a chunk
    pub fn encode_bytes(&self, file_name: &str, data: &[u8], modified_ms: u64) -> Result<EncodedTransfer> {
        let file_name = sanitize_file_name(file_name);
        if data.is_empty() {
            return Err(Error::EmptyFile(file_name));
        }
        let config = &self.config;

        let file_hash = ChunkHasher::hash(data);
        let file_id = ChunkHasher::file_id(&file_name, data.len() as u64, modified_ms);

        let plan = capacity::choose_config(data.len() as u64, &PlanConstraints::from(config))?;
        log::debug!(
            "Plan for {} ({} bytes): version {} level {} chunk {} bytes",
            file_name,
            data.len(),
            plan.version,
            plan.level,
            plan.chunk_size
        );

        let outcome = self.compress(data)?;
        let stream = outcome.data;

        // A compressed stream smaller than the planned chunk gets a smaller symbol
        let chunk_size = plan.chunk_size.min(stream.len().max(MIN_CHUNK_SIZE));
        let version =
            capacity::version_for_chunk(chunk_size, plan.level, config.min_version, config.max_version)?;

        let data_chunks = (stream.len() + chunk_size - 1) / chunk_size;
        let parity = match config.fec {
            Some(scheme) => encode_stream(&stream, &StripeLayout::new(data_chunks, chunk_size, scheme))?,
            None => Vec::new(),
        };

        let session_id = generate_session_id()?;
        let header = FrameHeader {
            file_id: file_id.clone(),
            session_id: session_id.clone(),
            file_hash: file_hash.clone(),
            file_name: file_name.clone(),
            file_size: data.len() as u64,
            code_version: version,
            level: plan.level,
            compression: outcome.algorithm,
            compression_ratio: outcome.ratio,
            chunk_size,
            fec: config.fec,
        };
        let data_length = stream.len() as u64;
        let chunks = ChunkFramer::new(header, stream, parity)?.collect_all()?;

        let mut session = TransferSession::new(
            session_id,
            file_id,
            file_name,
            data.len() as u64,
            file_hash,
            chunks.len() as u32,
            generate_resume_token()?,
        );
        session.compression_enabled = outcome.algorithm != CompressionAlgorithm::None;
        session.error_correction_enabled = config.fec.is_some();
        session.code_version = version;
        session.max_retries = config.max_retries;

        log::info!(
            "Encoded {} into {} chunks ({} data, {} parity) at version {}{}, {} compression {:.2}:1",
            session.file_name,
            chunks.len(),
            data_chunks,
            chunks.len() - data_chunks,
            version,
            plan.level,
            outcome.algorithm,
            outcome.ratio
        );

        Ok(EncodedTransfer {
            plan: CapacityPlan {
                version,
                chunk_size,
                capacity: capacity::capacity(version, plan.level),
                estimated_symbol_pixel_size: capacity::symbol_pixel_size(version, DEFAULT_MAX_PIXELS),
                total_chunks: data_chunks as u32,
                ..plan
            },
            chunks,
            session,
            compression_algorithm: outcome.algorithm,
            compression_ratio: outcome.ratio,
            data_length,
            data_chunks: data_chunks as u32,
            fec: config.fec,
        })
    }

    /// Apply the configured compression policy
    fn compress(&self, data: &[u8]) -> Result<CompressionOutcome> {
        let config = &self.config;
        if config.compression == CompressionMode::Off || data.len() <= config.compression_threshold {
            return Ok(CompressionOutcome::passthrough(data));
        }
        if !compression::is_compressible(data) {
            log::debug!(
                "Skipping compression, entropy {:.2} bits/byte",
                compression::entropy(data)
            );
            return Ok(CompressionOutcome::passthrough(data));
        }

        let outcome = match config.compression {
            CompressionMode::Fixed(algorithm) => compression::compress(data, algorithm)?,
            _ => compression::auto_compress(data),
        };
        if outcome.ratio <= 1.0 {
            return Ok(CompressionOutcome::passthrough(data));
        }
        log::debug!(
            "{} saved {}% ({} -> {} bytes)",
            outcome.algorithm,
            outcome.savings_percent(),
            data.len(),
            outcome.data.len()
        );
        Ok(outcome)
    }
}

/// Encode with a one-off encoder
pub fn encode_file(path: &Path, config: &TransferConfig) -> Result<EncodedTransfer> {
    Encoder::new(config.clone())?.encode_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TransferStatus;
    use crate::validation::ChunkValidator;

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x9E37_79B9_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let encoder = Encoder::new(TransferConfig::default()).unwrap();
        assert!(matches!(encoder.encode_bytes("e.txt", &[], 0), Err(Error::EmptyFile(_))));
    }

    #[test]
    fn test_compressible_input_uses_fewer_chunks() {
        let data = vec![0u8; 3000];
        let on = Encoder::new(TransferConfig::default().with_fec(None))
            .unwrap()
            .encode_bytes("zeros.bin", &data, 0)
            .unwrap();
        let off = Encoder::new(
            TransferConfig::default()
                .with_fec(None)
                .with_compression(CompressionMode::Off),
        )
        .unwrap()
        .encode_bytes("zeros.bin", &data, 0)
        .unwrap();

        assert!(on.compression_ratio >= 5.0);
        assert_ne!(on.compression_algorithm, CompressionAlgorithm::None);
        assert!(on.total_chunks() < off.total_chunks());
        assert_eq!(off.compression_algorithm, CompressionAlgorithm::None);
    }

    #[test]
    fn test_rebind_to_stored_session() {
        let encoder = Encoder::new(TransferConfig::default()).unwrap();
        let data = noise(4000);
        let stored = encoder.encode_bytes("a.bin", &data, 5).unwrap().session;
        let mut fresh = encoder.encode_bytes("a.bin", &data, 5).unwrap();
        assert_ne!(fresh.session.id, stored.id);

        fresh.rebind(stored.clone()).unwrap();
        assert_eq!(fresh.session.id, stored.id);
        assert!(fresh.chunks.iter().all(|c| c.session_id == stored.id && c.verify_payload_hash()));

        let mut other = encoder.encode_bytes("a.bin", &data, 6).unwrap();
        assert!(other.rebind(stored).is_err());
    }

    #[test]
    fn test_random_input_is_not_compressed() {
        let encoder = Encoder::new(TransferConfig::default()).unwrap();
        let encoded = encoder.encode_bytes("noise.bin", &noise(5000), 0).unwrap();
        assert_eq!(encoded.compression_algorithm, CompressionAlgorithm::None);
        assert_eq!(encoded.data_length, 5000);
    }

    #[test]
    fn test_layout_and_session_summary() {
        let config = TransferConfig::default().with_fec(Some(FecScheme::medium()));
        let encoded = Encoder::new(config)
            .unwrap()
            .encode_bytes("../payload.bin", &noise(50_000), 42)
            .unwrap();

        let c = encoded.plan.chunk_size as u64;
        assert_eq!(encoded.data_chunks as u64, (50_000 + c - 1) / c);
        let layout = StripeLayout::new(encoded.data_chunks as usize, c as usize, FecScheme::medium());
        assert_eq!(encoded.total_chunks() as usize, layout.total_chunks());

        let session = &encoded.session;
        assert_eq!(session.status, TransferStatus::Pending);
        assert_eq!(session.total_chunks, encoded.total_chunks());
        assert_eq!(session.file_name, "payload.bin");
        assert!(session.error_correction_enabled);
        assert_eq!(session.file_hash, ChunkHasher::hash(&noise(50_000)));

        let validator = ChunkValidator::default();
        for (i, chunk) in encoded.chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index as usize, i);
            assert_eq!(chunk.session_id, session.id);
            assert_eq!(chunk.is_parity(), i >= encoded.data_chunks as usize);
            validator.validate(chunk, chunk.timestamp).unwrap();
        }
    }

    #[test]
    fn test_wire_strings_fit_their_symbols() {
        for config in [
            TransferConfig::fast(),
            TransferConfig::balanced(),
            TransferConfig::high_reliability(),
        ] {
            let encoded = Encoder::new(config)
                .unwrap()
                .encode_bytes("report-with-a-rather-long-name.pdf", &noise(20_000), 0)
                .unwrap();
            let capacity = encoded.symbol_capacity();
            for wire in encoded.wire_payloads().unwrap() {
                assert!(wire.len() <= capacity, "{} > {}", wire.len(), capacity);
            }
        }
    }

    #[test]
    fn test_encode_file_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hello from disk ".repeat(200)).unwrap();
        let encoded = encode_file(&path, &TransferConfig::default()).unwrap();
        assert_eq!(encoded.session.file_name, "notes.txt");
        assert_eq!(encoded.session.file_size, 3200);

        assert!(encode_file(&dir.path().join("absent"), &TransferConfig::default()).is_err());
        fs::write(dir.path().join("empty"), b"").unwrap();
        assert!(matches!(
            encode_file(&dir.path().join("empty"), &TransferConfig::default()),
            Err(Error::EmptyFile(_))
        ));
    }
}
