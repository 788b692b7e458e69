// Best-effort heuristics for damaged spans that erasure coding could not rebuild

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compression::entropy;

/// Longest repeat period searched by pattern matching
pub const MAX_PATTERN_PERIOD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryMethod {
    ErasureCoding,
    Interpolation,
    PatternMatching,
}

impl fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryMethod::ErasureCoding => "erasure coding",
            RecoveryMethod::Interpolation => "interpolation",
            RecoveryMethod::PatternMatching => "pattern matching",
        };
        f.write_str(name)
    }
}

/// One heuristic applied to a damaged buffer
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryAttempt {
    pub method: RecoveryMethod,
    pub recovered: Vec<u8>,
    /// Estimated fraction of bytes that are right, 0.0 to 1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    pub attempts: Vec<RecoveryAttempt>,
}

impl RecoveryReport {
    /// Highest-confidence attempt; earlier attempts win ties
    pub fn best(&self) -> Option<&RecoveryAttempt> {
        self.attempts.iter().fold(None, |best: Option<&RecoveryAttempt>, a| match best {
            Some(b) if b.confidence >= a.confidence => Some(b),
            _ => Some(a),
        })
    }

    pub fn best_confidence(&self) -> f64 {
        self.best().map(|a| a.confidence).unwrap_or(0.0)
    }

    pub fn into_best(self) -> Option<RecoveryAttempt> {
        let index = self
            .attempts
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, a)| match best {
                Some((_, c)) if c >= a.confidence => best,
                _ => Some((i, a.confidence)),
            })?
            .0;
        self.attempts.into_iter().nth(index)
    }
}

/// How damaged `data` looks, 0.0 (pristine) to 1.0.
///
/// With a reference this is the fraction of differing bytes, and a length
/// mismatch counts as fully damaged. Without one it falls back to
/// [`entropy_deviation`].
pub fn corruption_level(data: &[u8], expected: Option<&[u8]>) -> f64 {
    match expected {
        None => entropy_deviation(data),
        Some(expected) if expected.len() != data.len() => 1.0,
        Some(_) if data.is_empty() => 0.0,
        Some(expected) => {
            let differences = data.iter().zip(expected).filter(|(a, b)| a != b).count();
            differences as f64 / data.len() as f64
        }
    }
}

/// Distance of the byte entropy from the 8-bit maximum, normalised to 0.0..=1.0
pub fn entropy_deviation(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    (8.0 - entropy(data)) / 8.0
}

fn damage_mask(len: usize, damaged: &[usize]) -> Vec<bool> {
    let mut mask = vec![false; len];
    for &i in damaged {
        if let Some(slot) = mask.get_mut(i) {
            *slot = true;
        }
    }
    mask
}

/// Fill each damaged byte by linear interpolation between the nearest intact
/// bytes on either side, or copy the only intact neighbour at the edges.
pub fn interpolate(data: &[u8], damaged: &[usize]) -> Vec<u8> {
    let mask = damage_mask(data.len(), damaged);
    let mut recovered = data.to_vec();
    let mut i = 0;
    while i < data.len() {
        if !mask[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < data.len() && mask[i] {
            i += 1;
        }
        let prev = start.checked_sub(1);
        let next = if i < data.len() { Some(i) } else { None };
        for (index, slot) in recovered.iter_mut().enumerate().take(i).skip(start) {
            *slot = match (prev, next) {
                (Some(p), Some(n)) => {
                    let weight = (index - p) as f64 / (n - p) as f64;
                    let value = data[p] as f64 * (1.0 - weight) + data[n] as f64 * weight;
                    value.round() as u8
                }
                (Some(p), None) => data[p],
                (None, Some(n)) => data[n],
                (None, None) => *slot,
            };
        }
    }
    recovered
}

/// Smallest period every intact byte agrees with, if any
pub fn find_period(data: &[u8], damaged: &[usize]) -> Option<usize> {
    let mask = damage_mask(data.len(), damaged);
    let longest = MAX_PATTERN_PERIOD.min(data.len() / 2);
    (1..=longest).find(|&period| {
        (period..data.len()).all(|i| mask[i] || mask[i - period] || data[i] == data[i - period])
    })
}

/// Replace damaged bytes with the majority intact value at the same phase of
/// the detected repeat period. Returns the input unchanged without a period.
pub fn pattern_match(data: &[u8], damaged: &[usize]) -> Vec<u8> {
    let mut recovered = data.to_vec();
    if let Some(period) = find_period(data, damaged) {
        let mask = damage_mask(data.len(), damaged);
        for phase in 0..period {
            let mut counts = [0usize; 256];
            for i in (phase..data.len()).step_by(period).filter(|&i| !mask[i]) {
                counts[data[i] as usize] += 1;
            }
            let candidate = counts
                .iter()
                .enumerate()
                .filter(|(_, &c)| c > 0)
                .max_by_key(|(_, &c)| c)
                .map(|(value, _)| value as u8);
            if let Some(value) = candidate {
                for i in (phase..data.len()).step_by(period).filter(|&i| mask[i]) {
                    recovered[i] = value;
                }
            }
        }
    }
    recovered
}

/// How often interpolation predicts an intact byte from its intact neighbours
fn interpolation_confidence(data: &[u8], mask: &[bool]) -> f64 {
    let mut samples = 0usize;
    let mut hits = 0usize;
    for i in 1..data.len().saturating_sub(1) {
        if mask[i - 1] || mask[i] || mask[i + 1] {
            continue;
        }
        samples += 1;
        let predicted = (data[i - 1] as i32 + data[i + 1] as i32 + 1) / 2;
        if (predicted - data[i] as i32).abs() <= 1 {
            hits += 1;
        }
    }
    if samples == 0 {
        return 0.0;
    }
    hits as f64 / samples as f64
}

/// Share of damaged bytes whose phase had an intact sample to copy
fn pattern_confidence(data: &[u8], mask: &[bool]) -> f64 {
    let damaged: Vec<usize> = (0..data.len()).filter(|&i| mask[i]).collect();
    if damaged.is_empty() {
        return 1.0;
    }
    let period = match find_period(data, &damaged) {
        Some(p) => p,
        None => return 0.0,
    };
    let covered = damaged
        .iter()
        .filter(|&&i| (i % period..data.len()).step_by(period).any(|j| !mask[j]))
        .count();
    covered as f64 / damaged.len() as f64
}

/// Run every heuristic over `data` with `damaged` byte positions.
///
/// With a `reference` each attempt is scored by the fraction of bytes equal
/// to it. Without one the score estimates how well the method predicts the
/// damaged bytes from the intact ones: random data scores near zero.
pub fn try_recovery_methods(data: &[u8], damaged: &[usize], reference: Option<&[u8]>) -> RecoveryReport {
    let mask = damage_mask(data.len(), damaged);
    let candidates = [
        (RecoveryMethod::Interpolation, interpolate(data, damaged)),
        (RecoveryMethod::PatternMatching, pattern_match(data, damaged)),
    ];

    let attempts = candidates
        .into_iter()
        .map(|(method, recovered)| {
            let confidence = match reference {
                Some(reference) => 1.0 - corruption_level(&recovered, Some(reference)),
                None => match method {
                    RecoveryMethod::Interpolation => interpolation_confidence(data, &mask),
                    RecoveryMethod::PatternMatching => pattern_confidence(data, &mask),
                    RecoveryMethod::ErasureCoding => 0.0,
                },
            };
            log::debug!("{} recovery confidence {:.3}", method, confidence);
            RecoveryAttempt {
                method,
                recovered,
                confidence,
            }
        })
        .collect();
    RecoveryReport { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_level() {
        assert_eq!(corruption_level(b"abcd", Some(&b"abcf"[..])), 0.25);
        assert_eq!(corruption_level(b"abc", Some(&b"abcd"[..])), 1.0);
        assert_eq!(corruption_level(&[0u8; 64], None), 1.0);
        let spread: Vec<u8> = (0..=255).collect();
        assert!(corruption_level(&spread, None) < 1e-9);
    }

    #[test]
    fn test_interpolate_linear_ramp() {
        let original: Vec<u8> = (0..50).map(|i| i * 2).collect();
        let mut damaged_data = original.clone();
        let damaged = [10, 11, 12, 30];
        for &i in &damaged {
            damaged_data[i] = 0xEE;
        }
        assert_eq!(interpolate(&damaged_data, &damaged), original);
    }

    #[test]
    fn test_interpolate_edges_copy_neighbour() {
        let data = [9u8, 9, 5, 6, 7, 9, 9];
        let recovered = interpolate(&data, &[0, 1, 5, 6]);
        assert_eq!(recovered, vec![5, 5, 5, 6, 7, 7, 7]);
    }

    #[test]
    fn test_pattern_match_restores_periodic_data() {
        let original: Vec<u8> = b"ABCDEFG".iter().cycle().take(200).copied().collect();
        let mut data = original.clone();
        let damaged: Vec<usize> = (50..60).collect();
        for &i in &damaged {
            data[i] = 0;
        }
        assert_eq!(find_period(&data, &damaged), Some(7));
        assert_eq!(pattern_match(&data, &damaged), original);

        let report = try_recovery_methods(&data, &damaged, None);
        let best = report.best().unwrap();
        assert_eq!(best.method, RecoveryMethod::PatternMatching);
        assert_eq!(best.confidence, 1.0);
        assert_eq!(best.recovered, original);
    }

    #[test]
    fn test_random_data_has_low_confidence() {
        let mut state = 0x1234_5678_u32;
        let data: Vec<u8> = (0..4000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect();
        let damaged: Vec<usize> = (1000..1400).collect();
        let report = try_recovery_methods(&data, &damaged, None);
        assert_eq!(report.attempts.len(), 2);
        assert!(report.best_confidence() < 0.8);
    }

    #[test]
    fn test_reference_scoring() {
        let original: Vec<u8> = (0..100).collect();
        let mut data = original.clone();
        data[40] = 0;
        let report = try_recovery_methods(&data, &[40], Some(original.as_slice()));
        let best = report.into_best().unwrap();
        assert_eq!(best.method, RecoveryMethod::Interpolation);
        assert_eq!(best.confidence, 1.0);
    }
}
