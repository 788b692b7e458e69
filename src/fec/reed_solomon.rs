// Systematic Reed-Solomon erasure code over GF(2^8)

use super::galois;
use super::matrix::Matrix;
use crate::common::error::{Error, Result};

/// Encoder/decoder for `data_shards` data shards and `parity_shards` parity shards.
///
/// Parity is the remainder of the data polynomial times `x^K` modulo the
/// generator `g(x) = (x - α^0)(x - α^1)...(x - α^(K-1))`, computed per byte
/// column. The resulting code is MDS, so any `N` of the `N + K` shards
/// determine the rest.
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    data_shards: usize,
    parity_shards: usize,
    /// Monic generator coefficients, highest degree first
    generator: Vec<u8>,
    /// `(N + K) x N`: identity on top, parity rows below
    encode_matrix: Matrix,
}

impl ReedSolomon {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 || parity_shards == 0 {
            return Err(Error::Fec("shard counts must be positive".into()));
        }
        if data_shards + parity_shards > galois::FIELD_ORDER {
            return Err(Error::Fec(format!(
                "{} + {} shards exceeds the field size",
                data_shards, parity_shards
            )));
        }

        let generator = generator_poly(parity_shards);
        let mut encode_matrix = Matrix::zeros(data_shards + parity_shards, data_shards);
        for i in 0..data_shards {
            encode_matrix.set(i, i, 1);
        }
        // Encoding is linear, so column i of the parity rows is the parity of e_i
        let mut unit = vec![0u8; data_shards];
        for i in 0..data_shards {
            unit[i] = 1;
            let parity = lfsr_parity(&generator, &unit);
            for (j, &p) in parity.iter().enumerate() {
                encode_matrix.set(data_shards + j, i, p);
            }
            unit[i] = 0;
        }

        Ok(Self {
            data_shards,
            parity_shards,
            generator,
            encode_matrix,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    pub fn generator(&self) -> &[u8] {
        &self.generator
    }

    fn shard_len<T: AsRef<[u8]>>(&self, shards: &[T]) -> Result<usize> {
        let len = shards.first().map(|s| s.as_ref().len()).unwrap_or(0);
        if shards.iter().any(|s| s.as_ref().len() != len) {
            return Err(Error::Fec("shards differ in length".into()));
        }
        Ok(len)
    }

    /// Parity shards for `data`, which must hold exactly `N` equal-length shards
    pub fn encode_parity<T: AsRef<[u8]>>(&self, data: &[T]) -> Result<Vec<Vec<u8>>> {
        if data.len() != self.data_shards {
            return Err(Error::Fec(format!(
                "expected {} data shards, got {}",
                self.data_shards,
                data.len()
            )));
        }
        let len = self.shard_len(data)?;
        let mut parity = vec![vec![0u8; len]; self.parity_shards];
        for (j, out) in parity.iter_mut().enumerate() {
            let row = self.encode_matrix.row(self.data_shards + j);
            for (coeff, shard) in row.iter().zip(data) {
                galois::mul_add_slice(*coeff, shard.as_ref(), out);
            }
        }
        Ok(parity)
    }

    /// All `N + K` shards: the data followed by its parity
    pub fn encode<T: AsRef<[u8]>>(&self, data: &[T]) -> Result<Vec<Vec<u8>>> {
        let parity = self.encode_parity(data)?;
        let mut all: Vec<Vec<u8>> = data.iter().map(|s| s.as_ref().to_vec()).collect();
        all.extend(parity);
        Ok(all)
    }

    /// Rebuild every shard whose `present` flag is false, in place.
    ///
    /// Fails with `Error::Unrecoverable` when more than `K` shards are absent;
    /// shard contents are left untouched in that case.
    pub fn decode(&self, shards: &mut [Vec<u8>], present: &[bool]) -> Result<()> {
        let total = self.total_shards();
        if shards.len() != total || present.len() != total {
            return Err(Error::Fec(format!(
                "expected {} shards and flags, got {} and {}",
                total,
                shards.len(),
                present.len()
            )));
        }

        let missing: Vec<usize> = (0..total).filter(|&i| !present[i]).collect();
        if missing.is_empty() {
            return Ok(());
        }
        if missing.len() > self.parity_shards {
            return Err(Error::Unrecoverable {
                damaged_chunks: missing.iter().map(|&i| i as u32).collect(),
                confidence: 0.0,
            });
        }

        let survivors: Vec<usize> = (0..total).filter(|&i| present[i]).take(self.data_shards).collect();
        let len = {
            let lens: Vec<&Vec<u8>> = survivors.iter().map(|&i| &shards[i]).collect();
            self.shard_len(&lens)?
        };

        let decode_matrix = self.encode_matrix.select_rows(&survivors).invert()?;

        for &target in missing.iter().filter(|&&i| i < self.data_shards) {
            let mut rebuilt = vec![0u8; len];
            for (k, &src) in survivors.iter().enumerate() {
                galois::mul_add_slice(decode_matrix.get(target, k), &shards[src], &mut rebuilt);
            }
            shards[target] = rebuilt;
        }

        if missing.iter().any(|&i| i >= self.data_shards) {
            let parity = self.encode_parity(&shards[..self.data_shards])?;
            for &target in missing.iter().filter(|&&i| i >= self.data_shards) {
                shards[target] = parity[target - self.data_shards].clone();
            }
        }
        Ok(())
    }

    /// Whether the shards are a consistent codeword
    pub fn verify<T: AsRef<[u8]>>(&self, shards: &[T]) -> Result<bool> {
        if shards.len() != self.total_shards() {
            return Ok(false);
        }
        let parity = self.encode_parity(&shards[..self.data_shards])?;
        Ok(parity
            .iter()
            .zip(&shards[self.data_shards..])
            .all(|(a, b)| a.as_slice() == b.as_ref()))
    }
}

/// Coefficients of ∏(x + α^i) for i < degree, highest degree first
fn generator_poly(degree: usize) -> Vec<u8> {
    let mut g = vec![1u8];
    for i in 0..degree {
        let root = galois::exp(i);
        let mut next = vec![0u8; g.len() + 1];
        for (k, &coeff) in g.iter().enumerate() {
            next[k] ^= coeff;
            next[k + 1] ^= galois::mul(coeff, root);
        }
        g = next;
    }
    g
}

/// Remainder of `message(x) * x^K` modulo the generator, via shift register
fn lfsr_parity(generator: &[u8], message: &[u8]) -> Vec<u8> {
    let k = generator.len() - 1;
    let mut reg = vec![0u8; k];
    for &m in message {
        let feedback = m ^ reg[0];
        reg.rotate_left(1);
        reg[k - 1] = 0;
        if feedback != 0 {
            for j in 0..k {
                reg[j] ^= galois::mul(generator[j + 1], feedback);
            }
        }
    }
    reg
}
