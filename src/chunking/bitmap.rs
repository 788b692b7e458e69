// Bitmap for tracking received chunks

/// Which chunk indices of a transfer have been received.
///
/// Memory usage: 1 bit per chunk. The total is known up front because
/// every chunk carries `totalChunks`.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkBitmap {
    bitmap: Vec<u8>,
    total_chunks: u32,
    received_count: u32,
}

impl ChunkBitmap {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            bitmap: vec![0u8; ((total_chunks + 7) / 8) as usize],
            total_chunks,
            received_count: 0,
        }
    }

    /// Bitmap with the given indices already marked; out-of-range ones are dropped
    pub fn from_indices(total_chunks: u32, indices: impl IntoIterator<Item = u32>) -> Self {
        let mut bitmap = Self::new(total_chunks);
        for index in indices {
            bitmap.mark_received(index);
        }
        bitmap
    }

    #[inline]
    pub fn is_received(&self, chunk_index: u32) -> bool {
        if chunk_index >= self.total_chunks {
            return false;
        }
        let byte_idx = (chunk_index >> 3) as usize;
        let bit_idx = (chunk_index & 7) as u8;
        (self.bitmap[byte_idx] & (1 << bit_idx)) != 0
    }

    /// Mark a chunk as received
    ///
    /// # Returns
    /// `true` if this is a new chunk, `false` if it was a duplicate or out of range
    pub fn mark_received(&mut self, chunk_index: u32) -> bool {
        if chunk_index >= self.total_chunks || self.is_received(chunk_index) {
            return false;
        }
        let byte_idx = (chunk_index >> 3) as usize;
        let bit_idx = (chunk_index & 7) as u8;
        self.bitmap[byte_idx] |= 1 << bit_idx;
        self.received_count += 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    /// Percentage (0.0 to 100.0)
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        (self.received_count as f64 / self.total_chunks as f64) * 100.0
    }

    /// `[0, total) - received`, ascending
    pub fn find_missing(&self) -> Vec<u32> {
        (0..self.total_chunks).filter(|&i| !self.is_received(i)).collect()
    }

    pub fn first_missing(&self) -> Option<u32> {
        (0..self.total_chunks).find(|&i| !self.is_received(i))
    }

    /// Contiguous runs of missing chunks as inclusive (start, end) pairs
    pub fn find_gaps(&self) -> Vec<(u32, u32)> {
        let mut gaps = Vec::new();
        let mut gap_start: Option<u32> = None;

        for chunk_index in 0..self.total_chunks {
            if !self.is_received(chunk_index) {
                if gap_start.is_none() {
                    gap_start = Some(chunk_index);
                }
            } else if let Some(start) = gap_start.take() {
                gaps.push((start, chunk_index - 1));
            }
        }

        if let Some(start) = gap_start {
            gaps.push((start, self.total_chunks - 1));
        }
        gaps
    }
}

impl std::fmt::Debug for ChunkBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkBitmap")
            .field("total_chunks", &self.total_chunks)
            .field("received_count", &self.received_count)
            .field("progress", &format!("{:.2}%", self.progress()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_received() {
        let mut bitmap = ChunkBitmap::new(10);
        assert!(bitmap.mark_received(0));
        assert!(!bitmap.mark_received(0));
        assert!(!bitmap.mark_received(10));
        assert_eq!(bitmap.received_count(), 1);
        assert!(bitmap.is_received(0));
        assert!(!bitmap.is_received(1));
    }

    #[test]
    fn test_completion() {
        let mut bitmap = ChunkBitmap::new(5);
        for i in 0..5 {
            bitmap.mark_received(i);
        }
        assert!(bitmap.is_complete());
        assert_eq!(bitmap.progress(), 100.0);
        assert_eq!(bitmap.first_missing(), None);
    }

    #[test]
    fn test_find_missing_and_gaps() {
        let bitmap = ChunkBitmap::from_indices(10, [0, 1, 5, 9, 42]);
        assert_eq!(bitmap.received_count(), 4);
        assert_eq!(bitmap.find_missing(), vec![2, 3, 4, 6, 7, 8]);
        assert_eq!(bitmap.find_gaps(), vec![(2, 4), (6, 8)]);
        assert_eq!(bitmap.first_missing(), Some(2));

        let tail = ChunkBitmap::from_indices(4, [0]);
        assert_eq!(tail.find_gaps(), vec![(1, 3)]);
    }

    #[test]
    fn test_memory_efficiency() {
        let bitmap = ChunkBitmap::new(10000);
        assert_eq!(bitmap.bitmap.len(), 1250);
    }
}
