// Framing a processed stream and its parity into chunks

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::chunk::Chunk;
use super::hasher::{generate_chunk_id, ChunkHasher};
use crate::common::error::{Error, Result};
use crate::common::types::{now_millis, ErrorLevel};
use crate::compression::CompressionAlgorithm;
use crate::fec::{FecScheme, StripeLayout};

/// Metadata repeated in every chunk of one transfer
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub file_id: String,
    pub session_id: String,
    pub file_hash: String,
    pub file_name: String,
    pub file_size: u64,
    pub code_version: u8,
    pub level: ErrorLevel,
    pub compression: CompressionAlgorithm,
    pub compression_ratio: f64,
    pub chunk_size: usize,
    pub fec: Option<FecScheme>,
}

/// Splits a processed stream into data chunks followed by parity chunks
pub struct ChunkFramer {
    header: FrameHeader,
    stream: Vec<u8>,
    parity: Vec<Vec<u8>>,
    data_chunks: u32,
    total_chunks: u32,
    current_chunk: u32,
    timestamp: u64,
}

impl ChunkFramer {
    /// Create a framer
    ///
    /// # Arguments
    /// * `header` - Transfer metadata copied into every chunk
    /// * `stream` - Processed (possibly compressed) bytes
    /// * `parity` - Parity shards, stripe-major, empty without FEC
    pub fn new(header: FrameHeader, stream: Vec<u8>, parity: Vec<Vec<u8>>) -> Result<Self> {
        if header.chunk_size == 0 {
            return Err(Error::Capacity("chunk size must be positive".into()));
        }
        let data_chunks = (stream.len() + header.chunk_size - 1) / header.chunk_size;
        let expected_parity = match header.fec {
            Some(scheme) => StripeLayout::new(data_chunks, header.chunk_size, scheme).parity_chunks(),
            None => 0,
        };
        if parity.len() != expected_parity {
            return Err(Error::Fec(format!(
                "expected {} parity shards, got {}",
                expected_parity,
                parity.len()
            )));
        }
        let total = data_chunks + parity.len();
        let total_chunks = u32::try_from(total)
            .map_err(|_| Error::Capacity(format!("{} chunks exceeds the index range", total)))?;

        Ok(Self {
            header,
            stream,
            parity,
            data_chunks: data_chunks as u32,
            total_chunks,
            current_chunk: 0,
            timestamp: now_millis(),
        })
    }

    /// Stamp every chunk with this time instead of the creation time
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn data_chunks(&self) -> u32 {
        self.data_chunks
    }

    pub fn current_chunk(&self) -> u32 {
        self.current_chunk
    }

    /// Fraction (0.0 to 1.0) of chunks produced so far
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        self.current_chunk as f64 / self.total_chunks as f64
    }

    /// Build the next chunk, or `None` after the last one
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.current_chunk >= self.total_chunks {
            return Ok(None);
        }
        let index = self.current_chunk;
        let c = self.header.chunk_size;

        let (payload, parity): (&[u8], Option<&[u8]>) = if index < self.data_chunks {
            let start = index as usize * c;
            let end = (start + c).min(self.stream.len());
            (&self.stream[start..end], None)
        } else {
            let shard = &self.parity[(index - self.data_chunks) as usize];
            (&self.stream[..0], Some(shard.as_slice()))
        };

        let (fec_data_shards, fec_parity_shards) = match self.header.fec {
            Some(s) => (s.data_shards as u32, s.parity_shards as u32),
            None => (0, 0),
        };

        let chunk = Chunk {
            id: generate_chunk_id()?,
            file_id: self.header.file_id.clone(),
            session_id: self.header.session_id.clone(),
            chunk_index: index,
            total_chunks: self.total_chunks,
            payload: STANDARD.encode(payload),
            payload_hash: ChunkHasher::payload_hash(payload, parity),
            file_hash: self.header.file_hash.clone(),
            timestamp: self.timestamp,
            code_version: self.header.code_version,
            error_tolerance_level: self.header.level,
            parity_payload: parity.map(|p| STANDARD.encode(p)),
            is_compressed: self.header.compression != CompressionAlgorithm::None,
            compression_ratio: self.header.compression_ratio,
            compression_algorithm: self.header.compression,
            file_name: self.header.file_name.clone(),
            file_size: self.header.file_size,
            data_length: self.stream.len() as u64,
            chunk_size: c as u32,
            data_chunks: self.data_chunks,
            fec_data_shards,
            fec_parity_shards,
            transmitted: false,
            received: false,
            verified: false,
        };

        self.current_chunk += 1;
        Ok(Some(chunk))
    }

    /// Frame everything that is left
    pub fn collect_all(mut self) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity((self.total_chunks - self.current_chunk) as usize);
        while let Some(chunk) = self.next_chunk()? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

impl Iterator for ChunkFramer {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
