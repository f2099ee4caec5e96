//! Protected Values
//!
//! A [`ProtectedValue`] keeps a live copy of a parameter next to an
//! [`EncodedBlock`] produced when the value was written. Every read goes
//! through [`ParameterStore::reconcile`], which repairs whichever side was hit
//! by a soft error.

use crate::ec::encoder::Shard;
use crate::ec::store::{ParamKey, ParameterStore};
use crate::error::{Error, Result};
use crate::faults::FaultSite;

/// Size in bytes of every protected payload
pub const PAYLOAD_LEN: usize = 8;

/// Values that can be held in a [`ProtectedValue`].
///
/// Values travel as 64-bit images; comparison is bitwise so a flipped NaN
/// payload is still detected.
pub trait Protectable: Copy + Send + 'static {
    /// 64-bit image of the value
    fn to_bits(self) -> u64;

    /// Rebuild the value from its 64-bit image, if the image is valid
    fn from_bits(bits: u64) -> Option<Self>;
}

impl Protectable for f64 {
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Option<Self> {
        Some(f64::from_bits(bits))
    }
}

impl Protectable for u64 {
    fn to_bits(self) -> u64 {
        self
    }

    fn from_bits(bits: u64) -> Option<Self> {
        Some(bits)
    }
}

impl Protectable for usize {
    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Option<Self> {
        usize::try_from(bits).ok()
    }
}

/// Redundant representation of one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlock {
    shards: Vec<Shard>,
}

impl EncodedBlock {
    pub(crate) fn new(shards: Vec<Shard>) -> Self {
        Self { shards }
    }

    /// Sealed shards, data first then parity
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Mutable access to the shards, used for fault injection
    pub fn shards_mut(&mut self) -> &mut [Shard] {
        &mut self.shards
    }

    /// Number of shards
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether the block holds no shards
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// A live value paired with its error-correcting encoding
#[derive(Debug, Clone)]
pub struct ProtectedValue<T: Protectable> {
    key: ParamKey,
    live: T,
    block: EncodedBlock,
}

impl<T: Protectable> ProtectedValue<T> {
    /// Encode `value` under `key`
    pub fn new(key: ParamKey, value: T, store: &ParameterStore) -> Result<Self> {
        Ok(Self {
            key,
            live: value,
            block: store.encode(value)?,
        })
    }

    /// Name of the protected parameter
    pub fn key(&self) -> ParamKey {
        self.key
    }

    /// Live value as currently held in memory, without reconciliation
    pub fn peek(&self) -> T {
        self.live
    }

    /// Read the value, reconciling the live copy against its encoding
    ///
    /// Fails with [`Error::Cancelled`] once the store's token has fired,
    /// without touching the value or its fault injector.
    ///
    /// Whenever the reconciled value differs from the live one, the live copy
    /// is replaced and the block re-encoded so later reads start clean.
    pub fn read(&mut self, store: &mut ParameterStore) -> Result<T> {
        let key = self.key;
        if store.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut live_bits = self.live.to_bits();
        store.inject(FaultSite::new(key, &mut live_bits, &mut self.block));

        let bits = store.reconcile_bits(key, live_bits, &mut self.block)?;
        let value = T::from_bits(bits).ok_or_else(|| Error::Corruption {
            key,
            reason: format!("image {:#x} is out of range", bits),
        })?;
        self.live = value;
        Ok(value)
    }

    /// Replace the value and re-encode it
    pub fn write(&mut self, value: T, store: &ParameterStore) -> Result<()> {
        self.block = store.encode(value)?;
        self.live = value;
        Ok(())
    }

    /// Overwrite the live copy without touching the encoding.
    ///
    /// Models a soft error hitting the in-memory value.
    pub fn corrupt_live(&mut self, flip_mask: u64) {
        if let Some(value) = T::from_bits(self.live.to_bits() ^ flip_mask) {
            self.live = value;
        }
    }

    /// Mutable access to the encoding, used for fault injection
    pub fn block_mut(&mut self) -> &mut EncodedBlock {
        &mut self.block
    }
}
