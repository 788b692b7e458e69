// Striping the chunk sequence into Reed-Solomon groups

use std::fmt;
use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::reed_solomon::ReedSolomon;
use crate::common::error::{Error, Result};

/// Named redundancy presets, ten data shards each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FecLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Shard counts for one erasure-coded stripe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FecScheme {
    pub data_shards: usize,
    pub parity_shards: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FecCapability {
    pub max_erasures: usize,
    pub max_errors: usize,
    pub redundancy_percent: f64,
}

impl FecScheme {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        let scheme = Self { data_shards, parity_shards };
        scheme.validate()?;
        Ok(scheme)
    }

    pub fn low() -> Self {
        Self { data_shards: 10, parity_shards: 2 }
    }

    pub fn medium() -> Self {
        Self { data_shards: 10, parity_shards: 3 }
    }

    pub fn high() -> Self {
        Self { data_shards: 10, parity_shards: 4 }
    }

    pub fn very_high() -> Self {
        Self { data_shards: 10, parity_shards: 5 }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_shards == 0 || self.parity_shards == 0 {
            return Err(Error::ConfigError("FEC shard counts must be positive".into()));
        }
        if self.data_shards + self.parity_shards > super::galois::FIELD_ORDER {
            return Err(Error::ConfigError(format!(
                "FEC {}+{} exceeds 255 shards",
                self.data_shards, self.parity_shards
            )));
        }
        Ok(())
    }

    pub fn capability(&self) -> FecCapability {
        FecCapability {
            max_erasures: self.parity_shards,
            max_errors: self.parity_shards / 2,
            redundancy_percent: self.parity_shards as f64 / self.data_shards as f64 * 100.0,
        }
    }

    pub fn codec(&self) -> Result<ReedSolomon> {
        ReedSolomon::new(self.data_shards, self.parity_shards)
    }
}

impl From<FecLevel> for FecScheme {
    fn from(level: FecLevel) -> Self {
        match level {
            FecLevel::Low => FecScheme::low(),
            FecLevel::Medium => FecScheme::medium(),
            FecLevel::High => FecScheme::high(),
            FecLevel::VeryHigh => FecScheme::very_high(),
        }
    }
}

impl fmt::Display for FecScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.data_shards, self.parity_shards)
    }
}

/// Where every data and parity shard sits in the chunk sequence.
///
/// Data chunks come first, `M = ceil(L / C)` of them. Each run of `N`
/// consecutive data chunks is a stripe, and the `K` parity chunks of stripe
/// `s` sit at `M + s*K .. M + (s+1)*K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeLayout {
    pub data_chunks: usize,
    pub chunk_size: usize,
    pub scheme: FecScheme,
}

impl StripeLayout {
    pub fn new(data_chunks: usize, chunk_size: usize, scheme: FecScheme) -> Self {
        Self { data_chunks, chunk_size, scheme }
    }

    pub fn stripes(&self) -> usize {
        (self.data_chunks + self.scheme.data_shards - 1) / self.scheme.data_shards
    }

    pub fn parity_chunks(&self) -> usize {
        self.stripes() * self.scheme.parity_shards
    }

    pub fn total_chunks(&self) -> usize {
        self.data_chunks + self.parity_chunks()
    }

    /// Data chunk indices of stripe `s`; the last stripe may be short
    pub fn data_range(&self, stripe: usize) -> Range<usize> {
        let start = stripe * self.scheme.data_shards;
        start..(start + self.scheme.data_shards).min(self.data_chunks)
    }

    pub fn parity_range(&self, stripe: usize) -> Range<usize> {
        let start = self.data_chunks + stripe * self.scheme.parity_shards;
        start..start + self.scheme.parity_shards
    }

    /// Stripe a chunk index belongs to, data or parity
    pub fn stripe_of(&self, chunk_index: usize) -> usize {
        if chunk_index < self.data_chunks {
            chunk_index / self.scheme.data_shards
        } else {
            (chunk_index - self.data_chunks) / self.scheme.parity_shards
        }
    }
}

/// Parity shards for a whole stream, stripe-major
pub fn encode_stream(stream: &[u8], layout: &StripeLayout) -> Result<Vec<Vec<u8>>> {
    let codec = layout.scheme.codec()?;
    let c = layout.chunk_size;

    let per_stripe: Vec<Result<Vec<Vec<u8>>>> = (0..layout.stripes())
        .into_par_iter()
        .map(|stripe| {
            let shards: Vec<Vec<u8>> = (0..layout.scheme.data_shards)
                .map(|i| {
                    let mut shard = vec![0u8; c];
                    let idx = stripe * layout.scheme.data_shards + i;
                    if idx < layout.data_chunks {
                        let start = idx * c;
                        let end = (start + c).min(stream.len());
                        if start < end {
                            shard[..end - start].copy_from_slice(&stream[start..end]);
                        }
                    }
                    shard
                })
                .collect();
            codec.encode_parity(&shards)
        })
        .collect();

    let mut parity = Vec::with_capacity(layout.parity_chunks());
    for stripe in per_stripe {
        parity.extend(stripe?);
    }
    Ok(parity)
}

/// Outcome of erasure repair over all stripes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Data chunk indices rebuilt from parity
    pub repaired: Vec<usize>,
    /// Data chunk indices still absent after repair
    pub unrepaired: Vec<usize>,
}

/// Fill absent data shards from parity wherever a stripe is within budget.
///
/// `data` holds one slot per data chunk and `parity` one slot per parity
/// chunk; present data shards shorter than the chunk size are zero-padded.
pub fn repair_stream(
    data: &mut [Option<Vec<u8>>],
    parity: &mut [Option<Vec<u8>>],
    layout: &StripeLayout,
) -> Result<RepairReport> {
    if data.len() != layout.data_chunks || parity.len() != layout.parity_chunks() {
        return Err(Error::Fec(format!(
            "layout expects {} data and {} parity slots, got {} and {}",
            layout.data_chunks,
            layout.parity_chunks(),
            data.len(),
            parity.len()
        )));
    }
    let codec = layout.scheme.codec()?;
    let n = layout.scheme.data_shards;
    let k = layout.scheme.parity_shards;
    let c = layout.chunk_size;

    let results: Vec<Result<(Vec<usize>, Vec<usize>)>> = data
        .par_chunks_mut(n)
        .zip(parity.par_chunks_mut(k))
        .enumerate()
        .map(|(stripe, (data, parity))| {
            let base = stripe * n;
            let absent: Vec<usize> = (0..data.len()).filter(|&i| data[i].is_none()).collect();
            if absent.is_empty() {
                return Ok((Vec::new(), Vec::new()));
            }
            let parity_absent = parity.iter().filter(|p| p.is_none()).count();
            if absent.len() + parity_absent > k {
                log::warn!(
                    "Stripe {} has {} erasures, parity budget is {}",
                    stripe,
                    absent.len() + parity_absent,
                    k
                );
                return Ok((Vec::new(), absent.iter().map(|i| base + i).collect()));
            }

            let mut shards = Vec::with_capacity(n + k);
            let mut present = Vec::with_capacity(n + k);
            for i in 0..n {
                let mut shard = vec![0u8; c];
                // Slots past the last data chunk are implicit zero shards
                let known = match data.get(i) {
                    Some(Some(bytes)) => {
                        let len = bytes.len().min(c);
                        shard[..len].copy_from_slice(&bytes[..len]);
                        true
                    }
                    Some(None) => false,
                    None => true,
                };
                shards.push(shard);
                present.push(known);
            }
            for p in parity.iter() {
                match p {
                    Some(bytes) if bytes.len() == c => {
                        shards.push(bytes.clone());
                        present.push(true);
                    }
                    _ => {
                        shards.push(vec![0u8; c]);
                        present.push(false);
                    }
                }
            }

            codec.decode(&mut shards, &present)?;
            for &i in &absent {
                data[i] = Some(std::mem::take(&mut shards[i]));
            }
            for (j, slot) in parity.iter_mut().enumerate() {
                if slot.is_none() {
                    *slot = Some(std::mem::take(&mut shards[n + j]));
                }
            }
            Ok((absent.iter().map(|i| base + i).collect(), Vec::new()))
        })
        .collect();

    let mut report = RepairReport::default();
    for result in results {
        let (repaired, unrepaired) = result?;
        report.repaired.extend(repaired);
        report.unrepaired.extend(unrepaired);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 131 % 256) as u8).collect()
    }

    fn split(stream: &[u8], c: usize) -> Vec<Option<Vec<u8>>> {
        stream.chunks(c).map(|s| Some(s.to_vec())).collect()
    }

    #[test]
    fn test_presets_and_capability() {
        assert_eq!(FecScheme::from(FecLevel::Medium), FecScheme::medium());
        let cap = FecScheme::high().capability();
        assert_eq!(cap.max_erasures, 4);
        assert_eq!(cap.max_errors, 2);
        assert!((cap.redundancy_percent - 40.0).abs() < 1e-9);
        assert!(FecScheme::new(200, 100).is_err());
        assert_eq!(FecScheme::very_high().to_string(), "10+5");
    }

    #[test]
    fn test_layout_indices() {
        let layout = StripeLayout::new(23, 100, FecScheme::medium());
        assert_eq!(layout.stripes(), 3);
        assert_eq!(layout.parity_chunks(), 9);
        assert_eq!(layout.total_chunks(), 32);
        assert_eq!(layout.data_range(2), 20..23);
        assert_eq!(layout.parity_range(1), 26..29);
        assert_eq!(layout.stripe_of(15), 1);
        assert_eq!(layout.stripe_of(29), 2);
    }

    #[test]
    fn test_repair_within_budget() {
        let c = 64;
        let bytes = stream(c * 23 - 17);
        let layout = StripeLayout::new(23, c, FecScheme::medium());
        let parity = encode_stream(&bytes, &layout).unwrap();
        assert_eq!(parity.len(), 9);

        let original = split(&bytes, c);
        let mut data = original.clone();
        let mut parity: Vec<Option<Vec<u8>>> = parity.into_iter().map(Some).collect();
        data[0] = None;
        data[5] = None;
        parity[1] = None;
        data[22] = None;

        let report = repair_stream(&mut data, &mut parity, &layout).unwrap();
        assert_eq!(report.repaired, vec![0, 5, 22]);
        assert!(report.unrepaired.is_empty());

        for (i, slot) in data.iter().enumerate() {
            let got = slot.as_ref().unwrap();
            let want = original[i].as_ref().unwrap();
            assert_eq!(&got[..want.len()], &want[..], "chunk {}", i);
        }
    }

    #[test]
    fn test_stripe_over_budget_left_unrepaired() {
        let c = 32;
        let bytes = stream(c * 20);
        let layout = StripeLayout::new(20, c, FecScheme::low());
        let parity = encode_stream(&bytes, &layout).unwrap();
        let mut data = split(&bytes, c);
        let mut parity: Vec<Option<Vec<u8>>> = parity.into_iter().map(Some).collect();
        for i in [10, 11, 12] {
            data[i] = None;
        }
        data[3] = None;

        let report = repair_stream(&mut data, &mut parity, &layout).unwrap();
        assert_eq!(report.repaired, vec![3]);
        assert_eq!(report.unrepaired, vec![10, 11, 12]);
        assert!(data[10].is_none());
    }
}
