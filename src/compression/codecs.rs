// Byte-stream compressor implementations

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};

use crate::common::error::{Error, Result};

/// Compression algorithm identifier, carried on the wire in lowercase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Lz4,
    Deflate,
    Gzip,
    Zstd,
}

impl CompressionAlgorithm {
    /// Every real compressor, in tie-break order
    pub const CANDIDATES: [CompressionAlgorithm; 4] = [
        CompressionAlgorithm::Lz4,
        CompressionAlgorithm::Deflate,
        CompressionAlgorithm::Gzip,
        CompressionAlgorithm::Zstd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Deflate => "deflate",
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionAlgorithm::None),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            "deflate" => Ok(CompressionAlgorithm::Deflate),
            "gzip" => Ok(CompressionAlgorithm::Gzip),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            other => Err(Error::ConfigError(format!("Unknown compression algorithm: {}", other))),
        }
    }
}

/// A reversible byte-stream compressor
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// Must fail on truncated or corrupt input rather than return a prefix
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn algorithm(&self) -> CompressionAlgorithm;
}

/// No compression (passthrough)
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }
}

/// LZ4 block format with a 4-byte little-endian length prefix
pub struct Lz4Compressor;

impl Lz4Compressor {
    fn fail(message: impl fmt::Display) -> Error {
        Error::Decompression {
            algorithm: CompressionAlgorithm::Lz4,
            message: message.to_string(),
        }
    }
}

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(vec![0; 4]);
        }
        lz4::block::compress(data, None, true).map_err(|e| Error::Compression {
            algorithm: CompressionAlgorithm::Lz4,
            message: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 4 {
            return Err(Self::fail("missing length prefix"));
        }
        let expected = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if expected == 0 {
            if data.len() == 4 {
                return Ok(Vec::new());
            }
            return Err(Self::fail("zero length prefix with trailing data"));
        }
        if data.len() == 4 {
            return Err(Self::fail("missing block"));
        }

        let out = lz4::block::decompress(data, None).map_err(Self::fail)?;
        if out.len() != expected {
            return Err(Self::fail(format!(
                "incomplete block: {} of {} bytes",
                out.len(),
                expected
            )));
        }
        Ok(out)
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }
}

/// Raw DEFLATE stream (no zlib header)
pub struct DeflateCompressor {
    level: u32,
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self { level: 9 }
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::Compression {
                algorithm: CompressionAlgorithm::Deflate,
                message: e.to_string(),
            })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let fail = |message: String| Error::Decompression {
            algorithm: CompressionAlgorithm::Deflate,
            message,
        };

        let mut inflater = Decompress::new(false);
        let mut out = Vec::with_capacity(data.len().saturating_mul(4).max(64));

        loop {
            let consumed = inflater.total_in() as usize;
            let produced = inflater.total_out();
            let status = inflater
                .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Finish)
                .map_err(|e| fail(e.to_string()))?;

            if status == Status::StreamEnd {
                break;
            }
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(4096));
                continue;
            }
            if inflater.total_in() as usize == consumed && inflater.total_out() == produced {
                return Err(fail(format!(
                    "truncated stream after {} of {} input bytes",
                    consumed,
                    data.len()
                )));
            }
        }

        if (inflater.total_in() as usize) != data.len() {
            return Err(fail("trailing bytes after end of stream".into()));
        }
        Ok(out)
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Deflate
    }
}

/// DEFLATE in a gzip container
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::Compression {
                algorithm: CompressionAlgorithm::Gzip,
                message: e.to_string(),
            })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let fail = |message: String| Error::Decompression {
            algorithm: CompressionAlgorithm::Gzip,
            message,
        };

        // 10-byte header plus 8-byte trailer
        if data.len() < 18 {
            return Err(fail(format!("{} bytes is shorter than a gzip member", data.len())));
        }

        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| fail(e.to_string()))?;

        let tail = &data[data.len() - 4..];
        let isize = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        if isize != out.len() as u32 {
            return Err(fail(format!(
                "length trailer {} disagrees with {} decoded bytes",
                isize,
                out.len()
            )));
        }
        Ok(out)
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }
}

/// Zstd compression - fast and efficient
pub struct ZstdCompressor {
    compression_level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self {
            compression_level: level.clamp(1, 22),
        }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.compression_level).map_err(|e| Error::Compression {
            algorithm: CompressionAlgorithm::Zstd,
            message: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| Error::Decompression {
            algorithm: CompressionAlgorithm::Zstd,
            message: e.to_string(),
        })
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zstd
    }
}

/// Factory for creating compressors
pub fn create_compressor(algorithm: CompressionAlgorithm) -> Box<dyn Compressor> {
    match algorithm {
        CompressionAlgorithm::None => Box::new(NoneCompressor),
        CompressionAlgorithm::Lz4 => Box::new(Lz4Compressor),
        CompressionAlgorithm::Deflate => Box::new(DeflateCompressor::default()),
        CompressionAlgorithm::Gzip => Box::new(GzipCompressor),
        CompressionAlgorithm::Zstd => Box::new(ZstdCompressor::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"Hello, World! ".repeat(100)
    }

    #[test]
    fn test_every_codec_round_trips() {
        let data = sample();
        for algorithm in CompressionAlgorithm::CANDIDATES {
            let codec = create_compressor(algorithm);
            assert_eq!(codec.algorithm(), algorithm);
            let packed = codec.compress(&data).unwrap();
            assert!(packed.len() < data.len(), "{} did not shrink", algorithm);
            assert_eq!(codec.decompress(&packed).unwrap(), data);
        }
    }

    #[test]
    fn test_empty_input_round_trips() {
        for algorithm in CompressionAlgorithm::CANDIDATES {
            let codec = create_compressor(algorithm);
            let packed = codec.compress(&[]).unwrap();
            assert!(codec.decompress(&packed).unwrap().is_empty(), "{}", algorithm);
        }
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        let data: Vec<u8> = (0..4000u32).map(|i| (i * 7 % 251) as u8).collect();
        for algorithm in CompressionAlgorithm::CANDIDATES {
            let codec = create_compressor(algorithm);
            let packed = codec.compress(&data).unwrap();
            let cut = &packed[..packed.len() / 2];
            match codec.decompress(cut) {
                Err(Error::Decompression { algorithm: a, .. }) => assert_eq!(a, algorithm),
                other => panic!("{} accepted truncated input: {:?}", algorithm, other.map(|v| v.len())),
            }
        }
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"abc";
        assert_eq!(NoneCompressor.compress(data).unwrap(), data);
        assert_eq!(NoneCompressor.decompress(data).unwrap(), data);
    }

    #[test]
    fn test_zstd_levels() {
        let data = sample();
        let fast = ZstdCompressor::new(1).compress(&data).unwrap();
        let high = ZstdCompressor::new(19).compress(&data).unwrap();
        assert!(high.len() <= fast.len());
        assert_eq!(ZstdCompressor::new(0).compression_level, 1);
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("GZIP".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Gzip);
        assert!("brotli".parse::<CompressionAlgorithm>().is_err());
        assert_eq!(serde_json::to_string(&CompressionAlgorithm::Lz4).unwrap(), "\"lz4\"");
    }
}
