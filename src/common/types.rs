// Common type definitions and constants

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::common::error::Error;

pub type SessionId = String;
pub type FileId = String;
pub type ChunkIndex = u32;

/// QR error-correction level, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorLevel {
    #[serde(rename = "L")]
    Low,
    #[serde(rename = "M")]
    Medium,
    #[serde(rename = "Q")]
    Quartile,
    #[serde(rename = "H")]
    High,
}

impl ErrorLevel {
    pub const ALL: [ErrorLevel; 4] = [
        ErrorLevel::Low,
        ErrorLevel::Medium,
        ErrorLevel::Quartile,
        ErrorLevel::High,
    ];

    pub fn ordinal(self) -> usize {
        match self {
            ErrorLevel::Low => 0,
            ErrorLevel::Medium => 1,
            ErrorLevel::Quartile => 2,
            ErrorLevel::High => 3,
        }
    }

    /// One step towards more payload and less redundancy
    pub fn weaker(self) -> Option<ErrorLevel> {
        match self {
            ErrorLevel::Low => None,
            ErrorLevel::Medium => Some(ErrorLevel::Low),
            ErrorLevel::Quartile => Some(ErrorLevel::Medium),
            ErrorLevel::High => Some(ErrorLevel::Quartile),
        }
    }

    pub fn stronger(self) -> Option<ErrorLevel> {
        match self {
            ErrorLevel::Low => Some(ErrorLevel::Medium),
            ErrorLevel::Medium => Some(ErrorLevel::Quartile),
            ErrorLevel::Quartile => Some(ErrorLevel::High),
            ErrorLevel::High => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            ErrorLevel::Low => 'L',
            ErrorLevel::Medium => 'M',
            ErrorLevel::Quartile => 'Q',
            ErrorLevel::High => 'H',
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for ErrorLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L" | "LOW" => Ok(ErrorLevel::Low),
            "M" | "MEDIUM" => Ok(ErrorLevel::Medium),
            "Q" | "QUARTILE" => Ok(ErrorLevel::Quartile),
            "H" | "HIGH" => Ok(ErrorLevel::High),
            other => Err(Error::ConfigError(format!("Unknown error level: {}", other))),
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// Constants
pub const MIN_VERSION: u8 = 1;
pub const MAX_VERSION: u8 = 40;
pub const MIN_CHUNK_SIZE: usize = 64;
pub const MAX_CHUNK_SIZE: usize = 2000;
/// Symbol bytes reserved for the JSON envelope around the base64 payload
pub const HEADER_MARGIN: usize = 768;
/// Above this many symbols the weakest error level is upgraded
pub const COMPLEXITY_THRESHOLD: u32 = 10;
pub const MAX_FILE_NAME_LEN: usize = 96;
/// Longest file or session id accepted from a symbol
pub const MAX_ID_LEN: usize = 64;

pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const MIN_DISPLAY: Duration = Duration::from_millis(300);
pub const DEFAULT_DISPLAY: Duration = Duration::from_millis(500);
pub const MAX_DISPLAY: Duration = Duration::from_millis(2000);
pub const SCAN_WINDOW: usize = 20;

pub const RECOVERY_CONFIDENCE_THRESHOLD: f64 = 0.8;
pub const PROTOCOL_VERSION: &str = "qrxfer/0.1";
