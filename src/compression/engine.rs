// Algorithm selection, ratios and entropy estimation

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::codecs::{create_compressor, CompressionAlgorithm};
use crate::common::error::Result;

/// Entropy (bits per byte) at or above which data is treated as random
pub const ENTROPY_THRESHOLD: f64 = 7.5;
/// Inputs shorter than this are never worth compressing
pub const MIN_COMPRESSIBLE_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionOutcome {
    pub data: Vec<u8>,
    /// original / compressed, 1.0 for passthrough
    pub ratio: f64,
    pub algorithm: CompressionAlgorithm,
    pub original_size: usize,
}

impl CompressionOutcome {
    pub fn passthrough(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            ratio: 1.0,
            algorithm: CompressionAlgorithm::None,
            original_size: data.len(),
        }
    }

    /// Space saved as a whole percentage
    pub fn savings_percent(&self) -> i32 {
        if self.ratio <= 0.0 {
            return 0;
        }
        ((1.0 - 1.0 / self.ratio) * 100.0) as i32
    }
}

fn ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        return 1.0;
    }
    original as f64 / compressed as f64
}

/// Compress with one specific algorithm
pub fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<CompressionOutcome> {
    if algorithm == CompressionAlgorithm::None {
        return Ok(CompressionOutcome::passthrough(data));
    }
    let packed = create_compressor(algorithm).compress(data)?;
    Ok(CompressionOutcome {
        ratio: ratio(data.len(), packed.len()),
        data: packed,
        algorithm,
        original_size: data.len(),
    })
}

/// Reverse [`compress`]; incomplete input is an error
pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    create_compressor(algorithm).decompress(data)
}

/// Try every algorithm and keep the best ratio. Failing algorithms are
/// skipped, and the result falls back to passthrough if none beats 1.0.
pub fn auto_compress(data: &[u8]) -> CompressionOutcome {
    let attempts: Vec<_> = CompressionAlgorithm::CANDIDATES
        .par_iter()
        .map(|&algorithm| (algorithm, compress(data, algorithm)))
        .collect();

    let mut best = CompressionOutcome::passthrough(data);
    for (algorithm, attempt) in attempts {
        match attempt {
            Ok(outcome) => {
                log::debug!("{} ratio {:.3} on {} bytes", algorithm, outcome.ratio, data.len());
                if outcome.ratio > best.ratio {
                    best = outcome;
                }
            }
            Err(e) => log::warn!("Skipping {}: {}", algorithm, e),
        }
    }
    best
}

/// Shannon entropy over the byte histogram, in bits per byte
pub fn entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut frequency = [0usize; 256];
    for &b in data {
        frequency[b as usize] += 1;
    }
    let len = data.len() as f64;
    frequency
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Whether compressing is worth trying at all
pub fn is_compressible(data: &[u8]) -> bool {
    data.len() >= MIN_COMPRESSIBLE_LEN && entropy(data) < ENTROPY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(len: usize) -> Vec<u8> {
        // xorshift, deterministic
        let mut state = 0x2545_f491_u32;
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
    fn test_entropy_bounds() {
        assert_eq!(entropy(&[]), 0.0);
        assert_eq!(entropy(&[7u8; 1000]), 0.0);
        let uniform: Vec<u8> = (0..=255u8).cycle().take(256 * 16).collect();
        assert!((entropy(&uniform) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_is_compressible() {
        assert!(!is_compressible(&[0u8; 50]));
        assert!(is_compressible(&[0u8; 3000]));
        assert!(!is_compressible(&noise(50_000)));
    }

    #[test]
    fn test_auto_compress_picks_best() {
        let data = vec![0u8; 3000];
        let outcome = auto_compress(&data);
        assert_ne!(outcome.algorithm, CompressionAlgorithm::None);
        assert!(outcome.ratio >= 5.0);
        for algorithm in CompressionAlgorithm::CANDIDATES {
            assert!(compress(&data, algorithm).unwrap().ratio <= outcome.ratio);
        }
        assert_eq!(decompress(&outcome.data, outcome.algorithm).unwrap(), data);
    }

    #[test]
    fn test_auto_compress_falls_back_on_noise() {
        let data = noise(2000);
        let outcome = auto_compress(&data);
        assert_eq!(outcome.algorithm, CompressionAlgorithm::None);
        assert_eq!(outcome.ratio, 1.0);
        assert_eq!(outcome.data, data);
    }

    #[test]
    fn test_savings_percent() {
        let outcome = compress(&[1u8; 4000], CompressionAlgorithm::Deflate).unwrap();
        assert!(outcome.savings_percent() > 90);
        assert_eq!(CompressionOutcome::passthrough(b"x").savings_percent(), 0);
    }
}
