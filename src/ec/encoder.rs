//! Checksummed Reed-Solomon Encoder/Decoder
//!
//! Implements Reed-Solomon encoding and decoding using the `reed-solomon-erasure` crate.
//! Every shard is sealed with an `xxh3` checksum seeded by its position, so a
//! shard hit by a soft error is located on read and treated as an erasure.
//! With `m` parity shards, up to `m` corrupted shards are repaired.

use crate::error::{Error, Result};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::sync::Arc;
use tracing::trace;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Largest shard count supported by GF(2^8)
pub const MAX_TOTAL_SHARDS: usize = 256;

// =============================================================================
// Shard
// =============================================================================

/// One symbol of an encoded block together with its integrity checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// Shard payload
    pub bytes: Vec<u8>,
    /// Checksum over the payload, seeded with the shard index
    pub checksum: u64,
}

impl Shard {
    /// Seal a payload at the given position
    pub fn seal(index: usize, bytes: Vec<u8>) -> Self {
        let checksum = shard_checksum(index, &bytes);
        Self { bytes, checksum }
    }

    /// Whether the payload still matches its checksum
    pub fn is_intact(&self, index: usize) -> bool {
        shard_checksum(index, &self.bytes) == self.checksum
    }
}

/// Checksum of a shard payload at a given position
pub fn shard_checksum(index: usize, bytes: &[u8]) -> u64 {
    xxh3_64_with_seed(bytes, index as u64)
}

fn build_codec(data_shards: usize, parity_shards: usize) -> Result<ReedSolomon> {
    if data_shards == 0 {
        return Err(Error::InvalidEcConfig(
            "data_shards must be greater than 0".to_string(),
        ));
    }
    if parity_shards == 0 {
        return Err(Error::InvalidEcConfig(
            "parity_shards must be greater than 0".to_string(),
        ));
    }
    if data_shards + parity_shards > MAX_TOTAL_SHARDS {
        return Err(Error::InvalidEcConfig(format!(
            "at most {} total shards are supported, got {}",
            MAX_TOTAL_SHARDS,
            data_shards + parity_shards
        )));
    }

    ReedSolomon::new(data_shards, parity_shards).map_err(|e| {
        Error::InvalidEcConfig(format!("Failed to create Reed-Solomon codec: {}", e))
    })
}

// =============================================================================
// EC Encoder
// =============================================================================

/// Encoder producing sealed data and parity shards
#[derive(Clone)]
pub struct EcEncoder {
    /// Reed-Solomon codec instance
    rs: Arc<ReedSolomon>,
    /// Number of data shards (k)
    data_shards: usize,
    /// Number of parity shards (m)
    parity_shards: usize,
}

impl std::fmt::Debug for EcEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcEncoder")
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .finish()
    }
}

impl EcEncoder {
    /// Create a new encoder with the specified k+m configuration
    ///
    /// # Arguments
    /// * `data_shards` - Number of data shards (k)
    /// * `parity_shards` - Number of parity shards (m), i.e. the correction capacity
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        Ok(Self {
            rs: Arc::new(build_codec(data_shards, parity_shards)?),
            data_shards,
            parity_shards,
        })
    }

    /// Get the number of data shards
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Get the number of parity shards
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Get the total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Encode data into sealed shards (data followed by parity)
    ///
    /// The input is padded so it splits evenly across the data shards.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Shard>> {
        if data.is_empty() {
            return Err(Error::EcEncodingFailed(
                "cannot encode an empty payload".to_string(),
            ));
        }

        let shard_size = calculate_shard_size(data.len(), self.data_shards);
        let mut raw: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());

        for i in 0..self.data_shards {
            let start = i * shard_size;
            let end = std::cmp::min(start + shard_size, data.len());

            let mut shard = if start < data.len() {
                data[start..end].to_vec()
            } else {
                Vec::new()
            };
            shard.resize(shard_size, 0);
            raw.push(shard);
        }

        for _ in 0..self.parity_shards {
            raw.push(vec![0u8; shard_size]);
        }

        self.rs
            .encode(&mut raw)
            .map_err(|e| Error::EcEncodingFailed(format!("Reed-Solomon encoding failed: {}", e)))?;

        trace!(
            "Encoded {} bytes into {} shards of {} bytes each",
            data.len(),
            self.total_shards(),
            shard_size
        );

        Ok(raw
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| Shard::seal(i, bytes))
            .collect())
    }

    /// Verify that the parity shards are consistent with the data shards
    #[cfg(test)]
    pub(crate) fn verify(&self, shards: &[Shard]) -> Result<bool> {
        if shards.len() != self.total_shards() {
            return Err(Error::InvalidEcConfig(format!(
                "Expected {} shards, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let raw: Vec<&[u8]> = shards.iter().map(|s| s.bytes.as_slice()).collect();
        self.rs
            .verify(&raw)
            .map_err(|e| Error::EcEncodingFailed(format!("Verification failed: {}", e)))
    }
}

// =============================================================================
// EC Decoder
// =============================================================================

/// Result of decoding a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    /// Original payload with padding removed
    pub data: Vec<u8>,
    /// Indices of shards that failed their checksum and were rebuilt
    pub repaired: Vec<usize>,
    /// Every shard, resealed after reconstruction; empty when nothing was repaired
    pub shards: Vec<Shard>,
}

impl DecodedBlock {
    /// Whether any shard had to be rebuilt
    pub fn was_repaired(&self) -> bool {
        !self.repaired.is_empty()
    }
}

/// Decoder locating corrupted shards by checksum and rebuilding them
#[derive(Clone)]
pub struct EcDecoder {
    /// Reed-Solomon codec instance
    rs: Arc<ReedSolomon>,
    /// Number of data shards (k)
    data_shards: usize,
    /// Number of parity shards (m)
    parity_shards: usize,
}

impl std::fmt::Debug for EcDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcDecoder")
            .field("data_shards", &self.data_shards)
            .field("parity_shards", &self.parity_shards)
            .finish()
    }
}

impl EcDecoder {
    /// Create a new decoder with the specified k+m configuration
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        Ok(Self {
            rs: Arc::new(build_codec(data_shards, parity_shards)?),
            data_shards,
            parity_shards,
        })
    }

    /// Get the number of data shards
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Get the number of parity shards
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Get the total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Reconstruct missing shards in place
    ///
    /// At least k shards must be present for reconstruction to succeed.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        if shards.len() != self.total_shards() {
            return Err(Error::InvalidEcConfig(format!(
                "Expected {} shards, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(Error::InsufficientShards {
                available,
                required: self.data_shards,
            });
        }

        self.rs
            .reconstruct(shards)
            .map_err(|e| Error::EcEncodingFailed(format!("Reed-Solomon reconstruction failed: {}", e)))
    }

    /// Decode sealed shards back to the original payload
    ///
    /// Shards failing their checksum are erased and rebuilt from the survivors.
    /// Fails with `InsufficientShards` when more than m shards are corrupted.
    pub fn decode(&self, shards: &[Shard], original_size: usize) -> Result<DecodedBlock> {
        if shards.len() != self.total_shards() {
            return Err(Error::InvalidEcConfig(format!(
                "Expected {} shards, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let shard_size = shards.first().map_or(0, |s| s.bytes.len());
        let clean = shards
            .iter()
            .enumerate()
            .all(|(i, shard)| shard.bytes.len() == shard_size && shard.is_intact(i));
        if clean {
            let mut data = Vec::with_capacity(original_size);
            for shard in &shards[..self.data_shards] {
                data.extend_from_slice(&shard.bytes);
            }
            data.truncate(original_size);
            return Ok(DecodedBlock {
                data,
                repaired: Vec::new(),
                shards: Vec::new(),
            });
        }

        let mut repaired = Vec::new();
        let mut slots: Vec<Option<Vec<u8>>> = shards
            .iter()
            .enumerate()
            .map(|(i, shard)| {
                if shard.is_intact(i) {
                    Some(shard.bytes.clone())
                } else {
                    repaired.push(i);
                    None
                }
            })
            .collect();

        // Payloads of intact shards must agree on size, otherwise the
        // checksum itself was forged by the corruption.
        let sizes: Vec<usize> = slots.iter().flatten().map(Vec::len).collect();
        if sizes.windows(2).any(|w| w[0] != w[1]) {
            return Err(Error::EcEncodingFailed(
                "intact shards disagree on shard size".to_string(),
            ));
        }

        if !repaired.is_empty() {
            self.reconstruct(&mut slots)?;
            trace!("Rebuilt {} corrupted shard(s)", repaired.len());
        }

        let mut data = Vec::with_capacity(original_size);
        for s in slots.iter().take(self.data_shards).flatten() {
            data.extend_from_slice(s);
        }
        data.truncate(original_size);

        let shards = slots
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| Shard::seal(i, bytes.unwrap_or_default()))
            .collect();

        Ok(DecodedBlock {
            data,
            repaired,
            shards,
        })
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Calculate the shard size for given data size and shard count
pub fn calculate_shard_size(data_size: usize, data_shards: usize) -> usize {
    data_size.div_ceil(data_shards)
}

/// Calculate storage overhead ratio (total/data)
pub fn storage_overhead(data_shards: usize, parity_shards: usize) -> f64 {
    (data_shards + parity_shards) as f64 / data_shards as f64
}

// =============================================================================
// Tests
// =============================================================================
