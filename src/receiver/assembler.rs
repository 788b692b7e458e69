// Reassembly of a chunk set into the original file

use std::collections::BTreeMap;

use super::recovery::{try_recovery_methods, RecoveryMethod};
use crate::chunking::Chunk;
use crate::common::error::{Error, Result};
use crate::common::types::{ChunkIndex, RECOVERY_CONFIDENCE_THRESHOLD};
use crate::compression::{self, CompressionAlgorithm};
use crate::fec::{repair_stream, StripeLayout};
use crate::validation::verify_data_hash;

/// A verified file and how it was put back together
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFile {
    pub data: Vec<u8>,
    /// Data chunks rebuilt from parity
    pub repaired_chunks: Vec<ChunkIndex>,
    /// Chunks whose payload failed its hash and were treated as erasures
    pub corrupt_chunks: Vec<ChunkIndex>,
    /// Set when a heuristic filled spans that parity could not
    pub heuristic: Option<RecoveryMethod>,
}

/// Transfer-wide parameters every chunk repeats
#[derive(Debug, Clone, Copy)]
struct Shape {
    chunk_size: usize,
    data_chunks: usize,
    data_length: usize,
}

impl Shape {
    fn of(chunk: &Chunk) -> Self {
        Self {
            chunk_size: chunk.chunk_size as usize,
            data_chunks: chunk.data_chunks as usize,
            data_length: chunk.data_length as usize,
        }
    }

    /// Unpadded length of data chunk `i`
    fn data_len(&self, i: usize) -> usize {
        self.chunk_size
            .min(self.data_length.saturating_sub(i * self.chunk_size))
    }
}

/// Rebuild the original file from whatever chunks are present.
///
/// Every stored chunk is re-hashed; failures become erasures. Absent or
/// corrupt data chunks are rebuilt from parity where a stripe is within its
/// budget. Anything left over goes to the recovery heuristics, and if their
/// best confidence is under the threshold the result is `Unrecoverable`.
/// The final whole-file hash is always checked.
///
/// # Arguments
/// * `reference` - Any chunk of the transfer, for its shared metadata
/// * `chunks` - Received chunks keyed by index
pub fn assemble(reference: &Chunk, chunks: &BTreeMap<ChunkIndex, Chunk>) -> Result<AssembledFile> {
    let shape = Shape::of(reference);
    if shape.chunk_size == 0 {
        return Err(Error::MalformedChunk("zero chunk size".into()));
    }
    let layout = reference
        .fec_scheme()
        .map(|scheme| StripeLayout::new(shape.data_chunks, shape.chunk_size, scheme));
    let parity_chunks = layout.map(|l| l.parity_chunks()).unwrap_or(0);

    let mut data: Vec<Option<Vec<u8>>> = vec![None; shape.data_chunks];
    let mut parity: Vec<Option<Vec<u8>>> = vec![None; parity_chunks];
    let mut corrupt_chunks = Vec::new();

    for (&index, chunk) in chunks {
        if !chunk.verify_payload_hash() {
            log::warn!("Chunk {} failed its payload hash, treating as erasure", index);
            corrupt_chunks.push(index);
            continue;
        }
        let i = index as usize;
        if i < shape.data_chunks {
            let bytes = chunk.payload_bytes()?;
            if bytes.len() != shape.data_len(i) {
                log::warn!("Chunk {} has {} bytes, expected {}", index, bytes.len(), shape.data_len(i));
                corrupt_chunks.push(index);
                continue;
            }
            data[i] = Some(bytes);
        } else if let Some(slot) = parity.get_mut(i - shape.data_chunks) {
            match chunk.parity_bytes()? {
                Some(bytes) if bytes.len() == shape.chunk_size => *slot = Some(bytes),
                _ => corrupt_chunks.push(index),
            }
        }
    }

    let mut repaired_chunks = Vec::new();
    let unrepaired: Vec<usize> = match &layout {
        Some(layout) if data.iter().any(Option::is_none) => {
            let report = repair_stream(&mut data, &mut parity, layout)?;
            repaired_chunks = report.repaired.iter().map(|&i| i as ChunkIndex).collect();
            if !repaired_chunks.is_empty() {
                log::info!("Rebuilt {} data chunks from parity", repaired_chunks.len());
            }
            report.unrepaired
        }
        _ => (0..shape.data_chunks).filter(|&i| data[i].is_none()).collect(),
    };

    let mut stream = Vec::with_capacity(shape.data_length);
    let mut damaged = Vec::new();
    for (i, slot) in data.into_iter().enumerate() {
        let len = shape.data_len(i);
        match slot {
            Some(mut bytes) => {
                bytes.truncate(len);
                stream.extend_from_slice(&bytes);
            }
            None => {
                damaged.extend(stream.len()..stream.len() + len);
                stream.resize(stream.len() + len, 0);
            }
        }
    }

    let mut heuristic = None;
    if !damaged.is_empty() {
        let report = try_recovery_methods(&stream, &damaged, None);
        let confidence = report.best_confidence();
        let damaged_chunks: Vec<ChunkIndex> = unrepaired.iter().map(|&i| i as ChunkIndex).collect();
        match report.into_best() {
            Some(best) if confidence >= RECOVERY_CONFIDENCE_THRESHOLD => {
                log::warn!(
                    "Filled {} damaged chunks by {} (confidence {:.2})",
                    damaged_chunks.len(),
                    best.method,
                    confidence
                );
                stream = best.recovered;
                heuristic = Some(best.method);
            }
            _ => {
                return Err(Error::Unrecoverable {
                    damaged_chunks,
                    confidence,
                })
            }
        }
    }

    let data = match reference.compression_algorithm {
        CompressionAlgorithm::None => stream,
        algorithm => compression::decompress(&stream, algorithm)?,
    };
    verify_data_hash(&data, &reference.file_hash)?;

    Ok(AssembledFile {
        data,
        repaired_chunks,
        corrupt_chunks,
        heuristic,
    })
}

/// Whether the present chunks are enough for erasure repair alone
pub fn is_repairable(reference: &Chunk, present: impl Fn(ChunkIndex) -> bool) -> bool {
    let shape = Shape::of(reference);
    let layout = match reference.fec_scheme() {
        Some(scheme) => StripeLayout::new(shape.data_chunks, shape.chunk_size, scheme),
        None => return (0..shape.data_chunks as ChunkIndex).all(&present),
    };
    (0..layout.stripes()).all(|stripe| {
        let data_range = layout.data_range(stripe);
        let missing_data = data_range.clone().filter(|&i| !present(i as ChunkIndex)).count();
        let missing_parity = layout
            .parity_range(stripe)
            .filter(|&i| !present(i as ChunkIndex))
            .count();
        missing_data == 0 || missing_data + missing_parity <= layout.scheme.parity_shards
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::TransferConfig;
    use crate::fec::FecScheme;
    use crate::sender::Encoder;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0xDEAD_BEEF_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect()
    }

    fn encode(data: &[u8], fec: Option<FecScheme>) -> Vec<Chunk> {
        Encoder::new(TransferConfig::default().with_fec(fec))
            .unwrap()
            .encode_bytes("file.bin", data, 0)
            .unwrap()
            .chunks
    }

    fn keyed(chunks: &[Chunk]) -> BTreeMap<ChunkIndex, Chunk> {
        chunks.iter().map(|c| (c.chunk_index, c.clone())).collect()
    }

    fn corrupt(chunk: &mut Chunk) {
        let mut bytes = chunk.payload_bytes().unwrap();
        bytes[0] ^= 0x5A;
        chunk.payload = STANDARD.encode(bytes);
    }

    #[test]
    fn test_clean_assembly() {
        let data = b"the quick brown fox ".repeat(300);
        let chunks = encode(&data, Some(FecScheme::low()));
        let file = assemble(&chunks[0], &keyed(&chunks)).unwrap();
        assert_eq!(file.data, data);
        assert!(file.repaired_chunks.is_empty());
        assert!(file.heuristic.is_none());
    }

    #[test]
    fn test_corrupt_chunks_are_repaired() {
        let data = noise(12_000);
        let mut chunks = encode(&data, Some(FecScheme::medium()));
        for i in [0, 4, 9] {
            corrupt(&mut chunks[i]);
        }
        let file = assemble(&chunks[0], &keyed(&chunks)).unwrap();
        assert_eq!(file.data, data);
        assert_eq!(file.corrupt_chunks, vec![0, 4, 9]);
        assert_eq!(file.repaired_chunks, vec![0, 4, 9]);
    }

    #[test]
    fn test_over_budget_is_unrecoverable() {
        let data = noise(12_000);
        let mut chunks = encode(&data, Some(FecScheme::medium()));
        for i in [1, 2, 3, 5] {
            corrupt(&mut chunks[i]);
        }
        match assemble(&chunks[0], &keyed(&chunks)) {
            Err(Error::Unrecoverable { damaged_chunks, confidence }) => {
                assert_eq!(damaged_chunks, vec![1, 2, 3, 5]);
                assert!(confidence < RECOVERY_CONFIDENCE_THRESHOLD);
            }
            other => panic!("expected unrecoverable, got {:?}", other.map(|f| f.data.len())),
        }
    }

    #[test]
    fn test_missing_without_fec() {
        let data = noise(3000);
        let chunks = encode(&data, None);
        let mut map = keyed(&chunks);
        map.remove(&1);
        assert!(matches!(
            assemble(&chunks[0], &map),
            Err(Error::Unrecoverable { .. })
        ));
    }

    #[test]
    fn test_is_repairable() {
        let data = noise(12_000);
        let chunks = encode(&data, Some(FecScheme::medium()));
        let reference = &chunks[0];
        assert!(is_repairable(reference, |i| i != 0 && i != 1 && i != 2));
        assert!(!is_repairable(reference, |i| i > 3));
        // Parity losses alone never matter
        let data_chunks = reference.data_chunks;
        assert!(is_repairable(reference, |i| i < data_chunks));
    }
}
