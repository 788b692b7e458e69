// Symbol version / error level / chunk size selection

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::table::{capacity, symbol_pixel_size};
use crate::common::config::TransferConfig;
use crate::common::error::{Error, Result};
use crate::common::types::{
    ErrorLevel, COMPLEXITY_THRESHOLD, HEADER_MARGIN, MAX_CHUNK_SIZE, MAX_VERSION, MIN_CHUNK_SIZE,
    MIN_VERSION,
};

/// Default largest on-screen symbol edge, in pixels
pub const DEFAULT_MAX_PIXELS: u32 = 800;

/// Limits the planner works within
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanConstraints {
    pub min_version: u8,
    pub max_version: u8,
    pub preferred_level: ErrorLevel,
    pub chunk_size_limit: usize,
    pub max_pixels: u32,
}

impl Default for PlanConstraints {
    fn default() -> Self {
        Self {
            min_version: MIN_VERSION,
            max_version: MAX_VERSION,
            preferred_level: ErrorLevel::Medium,
            chunk_size_limit: MAX_CHUNK_SIZE,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl From<&TransferConfig> for PlanConstraints {
    fn from(config: &TransferConfig) -> Self {
        Self {
            min_version: config.min_version,
            max_version: config.max_version,
            preferred_level: config.error_level,
            chunk_size_limit: config.chunk_size_limit,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

/// Chosen symbol configuration for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityPlan {
    pub version: u8,
    pub level: ErrorLevel,
    /// Raw payload bytes per chunk
    pub chunk_size: usize,
    /// Symbol capacity in bytes at (version, level)
    pub capacity: usize,
    pub estimated_symbol_pixel_size: u32,
    pub compression_recommended: bool,
    /// Data chunks implied by the estimated post-compression size
    pub total_chunks: u32,
}

/// Symbol bytes a chunk of `chunk_size` raw bytes occupies once framed
pub fn symbol_bytes_needed(chunk_size: usize) -> usize {
    base64_len(chunk_size) + HEADER_MARGIN
}

fn base64_len(n: usize) -> usize {
    (n + 2) / 3 * 4
}

/// Largest raw chunk that fits one symbol of `version` at `level`
pub fn max_chunk_for(version: u8, level: ErrorLevel) -> usize {
    let cap = capacity(version, level);
    if cap <= HEADER_MARGIN {
        return 0;
    }
    (cap - HEADER_MARGIN) / 4 * 3
}

/// Largest raw chunk any symbol can carry at `level`
pub fn max_chunk_size(level: ErrorLevel) -> usize {
    max_chunk_for(MAX_VERSION, level)
}

/// Cheap guess at the compressed size without running a compressor
pub fn estimate_compressed_size(size: u64) -> u64 {
    if size < 1024 {
        size
    } else if size < 1024 * 1024 {
        size * 7 / 10
    } else {
        size * 6 / 10
    }
}

fn target_chunk_size(effective_size: u64, level: ErrorLevel) -> usize {
    let by_level = match level {
        ErrorLevel::High => 800,
        ErrorLevel::Quartile => 1200,
        ErrorLevel::Medium => 1600,
        ErrorLevel::Low => 2000,
    };
    let by_size = if effective_size < 10 * 1024 {
        500
    } else if effective_size < 100 * 1024 {
        1000
    } else if effective_size < 1024 * 1024 {
        1500
    } else {
        2000
    };
    by_level.min(by_size)
}

fn smallest_version(chunk_size: usize, level: ErrorLevel, min: u8, max: u8) -> Option<u8> {
    let need = symbol_bytes_needed(chunk_size);
    (min..=max).find(|&v| capacity(v, level) >= need)
}

/// Pick (version, level, chunk size) for `data_size` bytes of input
///
/// When the preferred chunk does not fit the largest allowed version, the
/// chunk is shrunk to that version's ceiling at the preferred level. The
/// level is only degraded when even a `MIN_CHUNK_SIZE` chunk cannot fit.
///
/// # Arguments
/// * `data_size` - Size of the raw input in bytes
/// * `constraints` - Version range, preferred level and chunk ceiling
///
/// # Returns
/// The plan, or `Error::Capacity` when no symbol in range can carry even
/// the smallest chunk
pub fn choose_config(data_size: u64, constraints: &PlanConstraints) -> Result<CapacityPlan> {
    let PlanConstraints { min_version, max_version, .. } = *constraints;
    if min_version < MIN_VERSION || max_version > MAX_VERSION || min_version > max_version {
        return Err(Error::Capacity(format!(
            "Invalid version range {}..={}",
            min_version, max_version
        )));
    }

    let estimated = estimate_compressed_size(data_size);
    let compression_recommended = (estimated as f64) < data_size as f64 * 0.9;
    let effective = if compression_recommended { estimated } else { data_size };

    // Walk towards weaker levels until the largest symbol can hold a minimal chunk
    let mut level = constraints.preferred_level;
    let ceiling = loop {
        let ceiling = max_chunk_for(max_version, level);
        if ceiling >= MIN_CHUNK_SIZE {
            break ceiling;
        }
        match level.weaker() {
            Some(weaker) => {
                log::debug!("Level {} cannot fit version {}, degrading", level, max_version);
                level = weaker;
            }
            None => {
                return Err(Error::Capacity(format!(
                    "No symbol up to version {} can carry a {}-byte chunk",
                    max_version, MIN_CHUNK_SIZE
                )))
            }
        }
    };

    let target = target_chunk_size(effective, level)
        .min(constraints.chunk_size_limit)
        .min(effective.max(MIN_CHUNK_SIZE as u64) as usize)
        .min(ceiling)
        .max(MIN_CHUNK_SIZE);

    let version = smallest_version(target, level, min_version, max_version).ok_or_else(|| {
        Error::Capacity(format!("Chunk of {} bytes fits no version in range", target))
    })?;

    let mut chunk_size = target;
    let mut total_chunks = chunks_for(effective, chunk_size);

    if total_chunks > COMPLEXITY_THRESHOLD && level == ErrorLevel::Low {
        let upgraded = max_chunk_for(version, ErrorLevel::Medium).min(chunk_size);
        if upgraded >= MIN_CHUNK_SIZE {
            log::debug!(
                "{} symbols at level L, upgrading to M with {}-byte chunks",
                total_chunks,
                upgraded
            );
            level = ErrorLevel::Medium;
            chunk_size = upgraded;
            total_chunks = chunks_for(effective, chunk_size);
        }
    }

    Ok(CapacityPlan {
        version,
        level,
        chunk_size,
        capacity: capacity(version, level),
        estimated_symbol_pixel_size: symbol_pixel_size(version, constraints.max_pixels),
        compression_recommended,
        total_chunks,
    })
}

/// Smallest version at `level` whose symbols carry `chunk_size` raw bytes
pub fn version_for_chunk(chunk_size: usize, level: ErrorLevel, min: u8, max: u8) -> Result<u8> {
    smallest_version(chunk_size, level, min, max).ok_or_else(|| {
        Error::Capacity(format!(
            "Chunk of {} bytes fits no version {}..={} at level {}",
            chunk_size, min, max, level
        ))
    })
}

fn chunks_for(size: u64, chunk_size: usize) -> u32 {
    if size == 0 {
        return 0;
    }
    ((size + chunk_size as u64 - 1) / chunk_size as u64) as u32
}

/// Wall-clock time to show every chunk once
pub fn estimate_transmission_time(total_chunks: u32, display: Duration, scan: Duration) -> Duration {
    (display + scan) * total_chunks
}

/// Share of raw symbol capacity spent on the original bytes
pub fn bandwidth_efficiency(original_size: u64, symbols: u32, capacity: usize) -> f64 {
    let total = symbols as u64 * capacity as u64;
    if total == 0 {
        return 0.0;
    }
    original_size as f64 / total as f64
}

/// Grow or shrink a chunk size from observed scanning results
pub fn adjust_chunk_size(
    current: usize,
    success_rate: f64,
    scan_latency: Duration,
    level: ErrorLevel,
) -> usize {
    let ms = scan_latency.as_millis();
    let adjusted = if success_rate > 0.95 && ms < 1000 {
        current * 120 / 100
    } else if success_rate < 0.8 || ms > 3000 {
        current * 80 / 100
    } else {
        current
    };
    adjusted.clamp(MIN_CHUNK_SIZE, max_chunk_size(level).max(MIN_CHUNK_SIZE))
}

/// Reference plans for small, medium and large inputs
pub fn suggested_plans() -> Vec<(&'static str, CapacityPlan)> {
    let constraints = PlanConstraints::default();
    [("small", 10 * 1024u64), ("medium", 100 * 1024), ("large", 1024 * 1024)]
        .into_iter()
        .filter_map(|(name, size)| choose_config(size, &constraints).ok().map(|p| (name, p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ceilings() {
        assert_eq!(max_chunk_size(ErrorLevel::Low), 1638);
        assert_eq!(max_chunk_size(ErrorLevel::Medium), 1170);
        assert_eq!(max_chunk_size(ErrorLevel::Quartile), 669);
        assert_eq!(max_chunk_size(ErrorLevel::High), 378);
        for level in ErrorLevel::ALL {
            let c = max_chunk_size(level);
            assert!(symbol_bytes_needed(c) <= capacity(MAX_VERSION, level));
            assert!(symbol_bytes_needed(c + 3) > capacity(MAX_VERSION, level));
        }
    }

    #[test]
    fn test_small_input_not_recommended_for_compression() {
        let plan = choose_config(500, &PlanConstraints::default()).unwrap();
        assert!(!plan.compression_recommended);
        assert_eq!(plan.chunk_size, 500);
        assert_eq!(plan.total_chunks, 1);
        assert!(symbol_bytes_needed(plan.chunk_size) <= plan.capacity);
    }

    #[test]
    fn test_large_input_recommends_compression() {
        let plan = choose_config(2 * 1024 * 1024, &PlanConstraints::default()).unwrap();
        assert!(plan.compression_recommended);
        assert_eq!(plan.level, ErrorLevel::Medium);
        assert_eq!(plan.chunk_size, max_chunk_size(ErrorLevel::Medium));
        assert_eq!(plan.version, MAX_VERSION);
    }

    #[test]
    fn test_weak_level_upgraded_for_many_symbols() {
        let constraints = PlanConstraints {
            preferred_level: ErrorLevel::Low,
            ..Default::default()
        };
        let plan = choose_config(200 * 1024, &constraints).unwrap();
        assert_eq!(plan.level, ErrorLevel::Medium);
        assert!(symbol_bytes_needed(plan.chunk_size) <= capacity(plan.version, ErrorLevel::Medium));

        let few = choose_config(300, &constraints).unwrap();
        assert_eq!(few.level, ErrorLevel::Low);
    }

    #[test]
    fn test_level_degrades_when_range_too_small() {
        let constraints = PlanConstraints {
            max_version: 25,
            preferred_level: ErrorLevel::High,
            ..Default::default()
        };
        let plan = choose_config(5000, &constraints).unwrap();
        assert!(plan.level < ErrorLevel::High);
        assert!(plan.version <= 25);
    }

    #[test]
    fn test_chunk_shrinks_before_level_degrades() {
        let constraints = PlanConstraints {
            max_version: 30,
            ..Default::default()
        };
        let plan = choose_config(50_000, &constraints).unwrap();
        assert_eq!(plan.level, ErrorLevel::Medium);
        assert!(plan.version <= 30);
        assert!(plan.chunk_size < max_chunk_size(ErrorLevel::Medium));
        assert!(plan.chunk_size <= max_chunk_for(30, ErrorLevel::Medium));
        assert!(symbol_bytes_needed(plan.chunk_size) <= plan.capacity);
    }

    #[test]
    fn test_no_fit_is_an_error() {
        let constraints = PlanConstraints {
            max_version: 5,
            ..Default::default()
        };
        match choose_config(5000, &constraints) {
            Err(Error::Capacity(_)) => (),
            other => panic!("expected capacity error, got {:?}", other),
        }
    }

    #[test]
    fn test_version_grows_with_size() {
        let constraints = PlanConstraints::default();
        let mut last = 0;
        for size in [1u64, 100, 900, 5_000, 50_000, 500_000, 5_000_000] {
            let plan = choose_config(size, &constraints).unwrap();
            assert!(plan.version >= last, "size {} regressed", size);
            last = plan.version;
        }
    }

    #[test]
    fn test_estimates() {
        assert_eq!(
            estimate_transmission_time(10, Duration::from_millis(500), Duration::from_millis(200)),
            Duration::from_millis(7000)
        );
        assert!((bandwidth_efficiency(1000, 2, 1000) - 0.5).abs() < 1e-9);
        assert_eq!(bandwidth_efficiency(1000, 0, 1000), 0.0);
    }

    #[test]
    fn test_adjust_chunk_size() {
        let fast = Duration::from_millis(200);
        assert_eq!(adjust_chunk_size(500, 0.99, fast, ErrorLevel::Low), 600);
        assert_eq!(adjust_chunk_size(500, 0.5, fast, ErrorLevel::Low), 400);
        assert_eq!(adjust_chunk_size(500, 0.9, fast, ErrorLevel::Low), 500);
        assert_eq!(adjust_chunk_size(1600, 0.99, fast, ErrorLevel::Low), 1638);
    }

    #[test]
    fn test_suggested_plans() {
        let plans = suggested_plans();
        assert_eq!(plans.len(), 3);
        assert!(plans[0].1.version <= plans[2].1.version);
    }
}
