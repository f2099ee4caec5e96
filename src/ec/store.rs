//! Redundant Parameter Store
//!
//! Encodes parameters with a checksummed Reed-Solomon code and reconciles
//! every later read against that encoding.
//!
//! # Last-known-good values
//!
//! When a block is damaged beyond its correction capacity the store falls back
//! to the last value it corrected for the same [`ParamKey`]. Those values live
//! in two places:
//!
//! - a per-replica overlay, written only by the owning store;
//! - an injected, shared [`LastKnownGood`] that replicas only read. The
//!   execution harness absorbs an overlay into it once the owning replica has
//!   finished within its deadline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CounterConfig;
use crate::ec::encoder::{EcDecoder, EcEncoder};
use crate::ec::protected::{EncodedBlock, Protectable, PAYLOAD_LEN};
use crate::error::{Error, Result};
use crate::faults::{FaultInjector, FaultSite, NoFaults};

// =============================================================================
// Parameter Keys
// =============================================================================

/// Name of a protected parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKey {
    /// Declared column count
    Width,
    /// Declared row count
    Height,
    /// Intensity threshold
    Threshold,
    /// Running object count
    ObjectCount,
    /// One grid cell
    Cell { row: usize, col: usize },
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Width => write!(f, "width"),
            ParamKey::Height => write!(f, "height"),
            ParamKey::Threshold => write!(f, "threshold"),
            ParamKey::ObjectCount => write!(f, "object_count"),
            ParamKey::Cell { row, col } => write!(f, "cell({}, {})", row, col),
        }
    }
}

// =============================================================================
// Last-Known-Good Cache
// =============================================================================

/// Shared cache of last-known-good parameter images
#[derive(Debug, Default)]
pub struct LastKnownGood {
    entries: DashMap<ParamKey, u64>,
}

impl LastKnownGood {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw 64-bit image cached for `key`
    pub fn get(&self, key: ParamKey) -> Option<u64> {
        self.entries.get(&key).map(|e| *e)
    }

    /// Typed value cached for `key`
    pub fn get_value<T: Protectable>(&self, key: ParamKey) -> Option<T> {
        self.get(key).and_then(T::from_bits)
    }

    /// Record `value` as last-known-good for `key`
    pub fn insert<T: Protectable>(&self, key: ParamKey, value: T) {
        self.entries.insert(key, value.to_bits());
    }

    /// Merge a replica overlay into the cache
    pub fn absorb(&self, overlay: HashMap<ParamKey, u64>) {
        for (key, bits) in overlay {
            self.entries.insert(key, bits);
        }
    }

    /// Number of cached parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Store Statistics
// =============================================================================

/// Counters kept by one parameter store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Reconciled reads
    pub reads: u64,
    /// Reads where the live value was replaced by the decoded one
    pub corrections: u64,
    /// Reads where damaged shards were rebuilt
    pub block_repairs: u64,
    /// Reads served from a last-known-good value
    pub lkg_substitutions: u64,
    /// Reads that failed with no fallback
    pub degraded: u64,
}

impl StoreStats {
    /// Add another store's counters to these
    pub fn merge(&mut self, other: &StoreStats) {
        self.reads += other.reads;
        self.corrections += other.corrections;
        self.block_repairs += other.block_repairs;
        self.lkg_substitutions += other.lkg_substitutions;
        self.degraded += other.degraded;
    }
}

// =============================================================================
// Parameter Store
// =============================================================================

/// Per-replica encoder and reconciler of protected parameters
pub struct ParameterStore {
    encoder: EcEncoder,
    decoder: EcDecoder,
    shared: Arc<LastKnownGood>,
    learned: HashMap<ParamKey, u64>,
    injector: Arc<dyn FaultInjector>,
    cancel: CancellationToken,
    replica: usize,
    stats: StoreStats,
}

impl fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterStore")
            .field("replica", &self.replica)
            .field("encoder", &self.encoder)
            .field("learned", &self.learned.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ParameterStore {
    /// Create a store sized by `config`, reading fallbacks from `shared`
    pub fn new(config: &CounterConfig, shared: Arc<LastKnownGood>) -> Result<Self> {
        Ok(Self {
            encoder: EcEncoder::new(config.data_shards, config.correction_capacity)?,
            decoder: EcDecoder::new(config.data_shards, config.correction_capacity)?,
            shared,
            learned: HashMap::new(),
            injector: Arc::new(NoFaults),
            cancel: CancellationToken::new(),
            replica: 0,
            stats: StoreStats::default(),
        })
    }

    /// Route every read through `injector`
    pub fn with_injector(mut self, injector: Arc<dyn FaultInjector>) -> Self {
        self.injector = injector;
        self
    }

    /// Stop serving reads once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether the owning replica has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tag the store with the replica that owns it
    pub fn for_replica(mut self, replica: usize) -> Self {
        self.replica = replica;
        self
    }

    /// Index of the owning replica
    pub fn replica(&self) -> usize {
        self.replica
    }

    /// Number of corrupted shards a block can absorb
    pub fn correction_capacity(&self) -> usize {
        self.encoder.parity_shards()
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Values corrected by this store, not yet merged into the shared cache
    pub fn learned(&self) -> &HashMap<ParamKey, u64> {
        &self.learned
    }

    /// Consume the store, returning its overlay and counters
    pub fn into_parts(self) -> (HashMap<ParamKey, u64>, StoreStats) {
        (self.learned, self.stats)
    }

    /// Encode a value into a redundant block
    pub fn encode<T: Protectable>(&self, value: T) -> Result<EncodedBlock> {
        self.encode_bits(value.to_bits())
    }

    fn encode_bits(&self, bits: u64) -> Result<EncodedBlock> {
        Ok(EncodedBlock::new(self.encoder.encode(&bits.to_le_bytes())?))
    }

    /// Reconcile a live value against its encoding.
    ///
    /// Returns the decoded value when the two disagree, the live value when
    /// they match, and the last-known-good value when the block cannot be
    /// decoded. Damaged blocks are repaired in place.
    pub fn reconcile<T: Protectable>(
        &mut self,
        key: ParamKey,
        live: T,
        block: &mut EncodedBlock,
    ) -> Result<T> {
        let bits = self.reconcile_bits(key, live.to_bits(), block)?;
        T::from_bits(bits).ok_or_else(|| Error::Corruption {
            key,
            reason: format!("image {:#x} is out of range", bits),
        })
    }

    pub(crate) fn reconcile_bits(
        &mut self,
        key: ParamKey,
        live: u64,
        block: &mut EncodedBlock,
    ) -> Result<u64> {
        self.stats.reads += 1;

        let decoded = self
            .decoder
            .decode(block.shards(), PAYLOAD_LEN)
            .and_then(|decoded| {
                let bits = payload_bits(&decoded.data).ok_or_else(|| Error::Corruption {
                    key,
                    reason: format!("decoded {} bytes, expected {}", decoded.data.len(), PAYLOAD_LEN),
                })?;
                Ok((bits, decoded))
            });

        match decoded {
            Ok((bits, decoded)) => {
                if decoded.was_repaired() {
                    self.stats.block_repairs += 1;
                    debug!(
                        replica = self.replica,
                        %key,
                        shards = ?decoded.repaired,
                        "Rebuilt damaged shards"
                    );
                    *block = EncodedBlock::new(decoded.shards);
                }
                if bits != live {
                    self.stats.corrections += 1;
                    self.learned.insert(key, bits);
                    debug!(
                        replica = self.replica,
                        %key,
                        live,
                        decoded = bits,
                        "Corrected live value from encoding"
                    );
                }
                Ok(bits)
            }
            Err(err) => match self.last_known_good(key) {
                Some(bits) => {
                    self.stats.lkg_substitutions += 1;
                    warn!(
                        replica = self.replica,
                        %key,
                        error = %err,
                        "Encoding unrecoverable, substituting last-known-good value"
                    );
                    *block = self.encode_bits(bits)?;
                    Ok(bits)
                }
                None => {
                    self.stats.degraded += 1;
                    warn!(
                        replica = self.replica,
                        %key,
                        error = %err,
                        "Encoding unrecoverable and no last-known-good value"
                    );
                    Err(Error::Degraded { key })
                }
            },
        }
    }

    /// Last-known-good image for `key`, preferring this replica's own corrections
    pub fn last_known_good(&self, key: ParamKey) -> Option<u64> {
        self.learned
            .get(&key)
            .copied()
            .or_else(|| self.shared.get(key))
    }

    pub(crate) fn inject(&self, site: FaultSite<'_>) {
        self.injector.inject(self.replica, site);
    }
}

fn payload_bits(data: &[u8]) -> Option<u64> {
    let bytes: [u8; PAYLOAD_LEN] = data.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(shared: Arc<LastKnownGood>) -> ParameterStore {
        ParameterStore::new(&CounterConfig::default(), shared).unwrap()
    }

    fn wreck(block: &mut EncodedBlock, count: usize) {
        for shard in block.shards_mut().iter_mut().take(count) {
            shard.bytes[0] ^= 0x5A;
        }
    }

    #[test]
    fn test_param_key_display() {
        assert_eq!(ParamKey::Width.to_string(), "width");
        assert_eq!(ParamKey::Cell { row: 2, col: 7 }.to_string(), "cell(2, 7)");
    }

    #[test]
    fn test_reconcile_matching_value() {
        let mut store = store_with(Arc::new(LastKnownGood::new()));
        let mut block = store.encode(0.5f64).unwrap();

        assert_eq!(store.reconcile(ParamKey::Threshold, 0.5f64, &mut block).unwrap(), 0.5);
        assert_eq!(store.stats().corrections, 0);
        assert!(store.learned().is_empty());
    }

    #[test]
    fn test_reconcile_prefers_decoded_value() {
        let mut store = store_with(Arc::new(LastKnownGood::new()));
        let mut block = store.encode(3usize).unwrap();

        assert_eq!(store.reconcile(ParamKey::Width, 11usize, &mut block).unwrap(), 3);
        assert_eq!(store.stats().corrections, 1);
        assert_eq!(store.learned().get(&ParamKey::Width), Some(&3));
    }

    #[test]
    fn test_reconcile_repairs_block_within_capacity() {
        let mut store = store_with(Arc::new(LastKnownGood::new()));
        let mut block = store.encode(42u64).unwrap();
        let pristine = block.clone();

        wreck(&mut block, store.correction_capacity());

        assert_eq!(store.reconcile(ParamKey::ObjectCount, 42u64, &mut block).unwrap(), 42);
        assert_eq!(block, pristine);
        assert_eq!(store.stats().block_repairs, 1);
        assert_eq!(store.stats().corrections, 0);
    }

    #[test]
    fn test_reconcile_falls_back_to_own_correction() {
        let mut store = store_with(Arc::new(LastKnownGood::new()));
        let mut block = store.encode(0.25f64).unwrap();

        // First read corrects the live value and remembers the result.
        store.reconcile(ParamKey::Threshold, 0.9f64, &mut block).unwrap();

        wreck(&mut block, store.correction_capacity() + 1);
        assert_eq!(store.reconcile(ParamKey::Threshold, 0.9f64, &mut block).unwrap(), 0.25);
        assert_eq!(store.stats().lkg_substitutions, 1);

        // The block was re-encoded from the fallback.
        assert_eq!(store.reconcile(ParamKey::Threshold, 0.25f64, &mut block).unwrap(), 0.25);
    }

    #[test]
    fn test_reconcile_falls_back_to_shared_cache() {
        let shared = Arc::new(LastKnownGood::new());
        shared.insert(ParamKey::Height, 4usize);
        let mut store = store_with(shared.clone());
        let mut block = store.encode(3usize).unwrap();

        wreck(&mut block, store.correction_capacity() + 1);
        assert_eq!(store.reconcile(ParamKey::Height, 3usize, &mut block).unwrap(), 4);
        // Replicas never write the shared cache themselves.
        assert_eq!(shared.get_value::<usize>(ParamKey::Height), Some(4));
        assert!(store.learned().is_empty());
    }

    #[test]
    fn test_reconcile_degraded_without_fallback() {
        let mut store = store_with(Arc::new(LastKnownGood::new()));
        let mut block = store.encode(1.0f64).unwrap();

        wreck(&mut block, store.correction_capacity() + 1);
        let result = store.reconcile(ParamKey::Threshold, 1.0f64, &mut block);
        assert_eq!(
            result,
            Err(Error::Degraded {
                key: ParamKey::Threshold
            })
        );
        assert_eq!(store.stats().degraded, 1);
    }

    #[test]
    fn test_absorb_overlay() {
        let shared = LastKnownGood::new();
        let mut overlay = HashMap::new();
        overlay.insert(ParamKey::Width, 9);
        shared.absorb(overlay);

        assert_eq!(shared.len(), 1);
        assert_eq!(shared.get_value::<usize>(ParamKey::Width), Some(9));
        assert!(!shared.is_empty());
    }

    #[test]
    fn test_stats_merge() {
        let mut total = StoreStats::default();
        let one = StoreStats {
            reads: 10,
            corrections: 1,
            block_repairs: 2,
            lkg_substitutions: 0,
            degraded: 1,
        };
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.reads, 20);
        assert_eq!(total.block_repairs, 4);
        assert_eq!(total.degraded, 2);
    }
}
