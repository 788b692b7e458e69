// Configuration types and parsing

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capacity;
use crate::common::error::{Error, Result};
use crate::common::types::{
    ErrorLevel, DEFAULT_DISPLAY, DEFAULT_FRESHNESS_WINDOW, DEFAULT_RETENTION, MAX_DISPLAY,
    MAX_VERSION, MIN_CHUNK_SIZE, MIN_DISPLAY, MIN_VERSION,
};
use crate::compression::CompressionAlgorithm;
use crate::fec::FecScheme;
use crate::scheduler::CyclePolicy;

/// How the sender picks a compressor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Try every algorithm and keep the best ratio
    Auto,
    Off,
    Fixed(CompressionAlgorithm),
}

/// Per-transfer settings. Built once and not mutated while a transfer runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    pub min_version: u8,
    pub max_version: u8,
    pub error_level: ErrorLevel,
    /// Inputs at or below this many bytes are never compressed
    pub compression_threshold: usize,
    pub compression: CompressionMode,
    /// Upper bound on raw payload bytes per chunk
    pub chunk_size_limit: usize,
    #[serde(with = "millis")]
    pub display_duration: Duration,
    #[serde(with = "millis")]
    pub min_display: Duration,
    #[serde(with = "millis")]
    pub max_display: Duration,
    pub max_retries: u32,
    pub adaptive_sizing: bool,
    pub verify_each_chunk: bool,
    pub fec: Option<FecScheme>,
    #[serde(with = "millis")]
    pub freshness_window: Duration,
    pub cycle_policy: CyclePolicy,
    #[serde(with = "millis")]
    pub retention: Duration,
    pub session_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl TransferConfig {
    /// Larger symbols, weak error correction, no per-chunk verification
    pub fn fast() -> Self {
        Self {
            error_level: ErrorLevel::Low,
            compression_threshold: 2048,
            chunk_size_limit: capacity::max_chunk_size(ErrorLevel::Low),
            display_duration: MIN_DISPLAY,
            max_retries: 1,
            verify_each_chunk: false,
            fec: None,
            ..Self::balanced()
        }
    }

    pub fn balanced() -> Self {
        Self {
            min_version: MIN_VERSION,
            max_version: MAX_VERSION,
            error_level: ErrorLevel::Medium,
            compression_threshold: 1024,
            compression: CompressionMode::Auto,
            chunk_size_limit: 1024,
            display_duration: DEFAULT_DISPLAY,
            min_display: MIN_DISPLAY,
            max_display: MAX_DISPLAY,
            max_retries: 3,
            adaptive_sizing: true,
            verify_each_chunk: true,
            fec: Some(FecScheme::medium()),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            cycle_policy: CyclePolicy::Forever,
            retention: DEFAULT_RETENTION,
            session_dir: PathBuf::from(".qrxfer/sessions"),
            output_dir: PathBuf::from("./received"),
        }
    }

    /// Strong error correction, smaller chunks, slower cadence
    pub fn high_reliability() -> Self {
        Self {
            error_level: ErrorLevel::High,
            compression_threshold: 512,
            chunk_size_limit: 512,
            display_duration: Duration::from_millis(800),
            max_retries: 5,
            fec: Some(FecScheme::very_high()),
            ..Self::balanced()
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "fast" => Ok(Self::fast()),
            "balanced" | "default" => Ok(Self::balanced()),
            "high-reliability" | "reliable" => Ok(Self::high_reliability()),
            other => Err(Error::ConfigError(format!("Unknown preset: {}", other))),
        }
    }

    pub fn with_versions(mut self, min: u8, max: u8) -> Result<Self> {
        if min < MIN_VERSION || max > MAX_VERSION || min > max {
            return Err(Error::ConfigError(format!(
                "Version range must satisfy {} <= min <= max <= {}",
                MIN_VERSION, MAX_VERSION
            )));
        }
        self.min_version = min;
        self.max_version = max;
        Ok(self)
    }

    pub fn with_error_level(mut self, level: ErrorLevel) -> Self {
        self.error_level = level;
        self
    }

    pub fn with_compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    pub fn with_chunk_size_limit(mut self, size: usize) -> Result<Self> {
        let ceiling = capacity::max_chunk_size(ErrorLevel::Low);
        if size < MIN_CHUNK_SIZE || size > ceiling {
            return Err(Error::ConfigError(format!(
                "Chunk size limit must be between {} and {}",
                MIN_CHUNK_SIZE, ceiling
            )));
        }
        self.chunk_size_limit = size;
        Ok(self)
    }

    pub fn with_display_duration(mut self, duration: Duration) -> Result<Self> {
        check_display(duration)?;
        self.display_duration = duration;
        Ok(self)
    }

    pub fn with_max_retries(mut self, retries: u32) -> Result<Self> {
        if retries > 10 {
            return Err(Error::ConfigError("Retry count must be between 0 and 10".into()));
        }
        self.max_retries = retries;
        Ok(self)
    }

    pub fn with_fec(mut self, fec: Option<FecScheme>) -> Self {
        self.fec = fec;
        self
    }

    pub fn with_verify_each_chunk(mut self, verify: bool) -> Self {
        self.verify_each_chunk = verify;
        self
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    pub fn with_session_dir(mut self, dir: PathBuf) -> Self {
        self.session_dir = dir;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    /// Check every option against its documented range
    pub fn validate(&self) -> Result<()> {
        if self.min_version < MIN_VERSION
            || self.max_version > MAX_VERSION
            || self.min_version > self.max_version
        {
            return Err(Error::ConfigError(format!(
                "Invalid version range {}..={}",
                self.min_version, self.max_version
            )));
        }

        let ceiling = capacity::max_chunk_size(ErrorLevel::Low);
        if self.chunk_size_limit < MIN_CHUNK_SIZE || self.chunk_size_limit > ceiling {
            return Err(Error::ConfigError(format!(
                "Chunk size limit {} outside {}..={}",
                self.chunk_size_limit, MIN_CHUNK_SIZE, ceiling
            )));
        }

        check_display(self.display_duration)?;
        check_display(self.min_display)?;
        check_display(self.max_display)?;
        if self.min_display > self.max_display {
            return Err(Error::ConfigError("min_display exceeds max_display".into()));
        }

        if self.max_retries > 10 {
            return Err(Error::ConfigError(format!(
                "Retry count {} outside 0..=10",
                self.max_retries
            )));
        }

        if let Some(fec) = &self.fec {
            fec.validate()?;
        }

        if self.freshness_window.is_zero() {
            return Err(Error::ConfigError("Freshness window must be positive".into()));
        }

        Ok(())
    }

    /// Load a configuration from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: TransferConfig = serde_json::from_str(&data)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn check_display(duration: Duration) -> Result<()> {
    let ms = duration.as_millis();
    if !(100..=5000).contains(&ms) {
        return Err(Error::ConfigError(format!(
            "Display duration {} ms outside 100..=5000",
            ms
        )));
    }
    Ok(())
}

/// Durations travel as integer milliseconds in JSON
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_presets_are_valid() {
        for config in [
            TransferConfig::fast(),
            TransferConfig::balanced(),
            TransferConfig::high_reliability(),
        ] {
            config.validate().unwrap();
        }
        assert_eq!(TransferConfig::default(), TransferConfig::balanced());
        assert_eq!(TransferConfig::preset("high_reliability").unwrap().error_level, ErrorLevel::High);
        assert!(TransferConfig::preset("turbo").is_err());
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        assert!(TransferConfig::default().with_versions(0, 10).is_err());
        assert!(TransferConfig::default().with_versions(12, 10).is_err());
        assert!(TransferConfig::default().with_max_retries(11).is_err());
        assert!(TransferConfig::default().with_chunk_size_limit(10).is_err());
        assert!(TransferConfig::default().with_chunk_size_limit(5000).is_err());
        assert!(TransferConfig::default()
            .with_display_duration(Duration::from_millis(50))
            .is_err());

        let config = TransferConfig::default().with_versions(5, 20).unwrap();
        assert_eq!((config.min_version, config.max_version), (5, 20));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = TransferConfig::high_reliability()
            .with_compression(CompressionMode::Fixed(CompressionAlgorithm::Lz4));
        config.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"displayDuration\": 800"));

        let loaded = TransferConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TransferConfig =
            serde_json::from_str(r#"{"errorLevel":"Q","maxRetries":2}"#).unwrap();
        assert_eq!(config.error_level, ErrorLevel::Quartile);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.chunk_size_limit, TransferConfig::balanced().chunk_size_limit);
    }
}
