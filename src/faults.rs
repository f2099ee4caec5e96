//! Soft-Error Injection
//!
//! Every protected read passes its live value and encoded block through a
//! [`FaultInjector`] before reconciliation. Production runs use [`NoFaults`];
//! resilience drills and tests plug in [`ScheduledFaults`] for exact scenarios
//! or [`RandomBitFlips`] for a seeded background error rate.

use std::fmt;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ec::protected::EncodedBlock;
use crate::ec::store::ParamKey;

// =============================================================================
// Fault Site
// =============================================================================

/// Memory touched by one protected read
pub struct FaultSite<'a> {
    key: ParamKey,
    live: &'a mut u64,
    block: &'a mut EncodedBlock,
}

impl<'a> FaultSite<'a> {
    pub(crate) fn new(key: ParamKey, live: &'a mut u64, block: &'a mut EncodedBlock) -> Self {
        Self { key, live, block }
    }

    /// Parameter being read
    pub fn key(&self) -> ParamKey {
        self.key
    }

    /// Number of shards in the encoded block
    pub fn shard_count(&self) -> usize {
        self.block.len()
    }

    /// XOR the live value's 64-bit image with `mask`
    pub fn flip_live(&mut self, mask: u64) {
        *self.live ^= mask;
    }

    /// XOR the first byte of shard `index` with `mask`
    pub fn corrupt_shard(&mut self, index: usize, mask: u8) {
        if let Some(byte) = self
            .block
            .shards_mut()
            .get_mut(index)
            .and_then(|s| s.bytes.first_mut())
        {
            *byte ^= mask;
        }
    }
}

/// Hook invoked on every protected read
pub trait FaultInjector: Send + Sync {
    /// Possibly corrupt the memory behind one read performed by `replica`
    fn inject(&self, replica: usize, site: FaultSite<'_>);
}

/// Injector that never corrupts anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn inject(&self, _replica: usize, _site: FaultSite<'_>) {}
}

// =============================================================================
// Scheduled Faults
// =============================================================================

/// Kind of corruption applied by a planned fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// XOR the live value with a mask
    FlipLive(u64),
    /// Corrupt the first `n` shards of the encoded block
    CorruptShards(usize),
    /// Both of the above at once
    FlipLiveAndCorruptShards(u64, usize),
}

/// One corruption to apply on a matching read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFault {
    /// Replica to hit, or every replica when `None`
    pub replica: Option<usize>,
    /// Parameter to hit
    pub key: ParamKey,
    /// What to corrupt
    pub kind: FaultKind,
    /// How many matching reads to hit
    pub times: usize,
}

impl PlannedFault {
    /// Fault hitting every read of `key` in every replica
    pub fn new(key: ParamKey, kind: FaultKind) -> Self {
        Self {
            replica: None,
            key,
            kind,
            times: usize::MAX,
        }
    }

    /// Restrict the fault to one replica
    pub fn on_replica(mut self, replica: usize) -> Self {
        self.replica = Some(replica);
        self
    }

    /// Hit `times` matching reads in total
    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    fn matches(&self, replica: usize, key: ParamKey) -> bool {
        self.times > 0 && self.key == key && self.replica.map_or(true, |r| r == replica)
    }
}

/// Injector applying an explicit list of faults
#[derive(Default)]
pub struct ScheduledFaults {
    plan: Mutex<Vec<PlannedFault>>,
    fired: Mutex<Vec<(usize, ParamKey)>>,
}

impl fmt::Debug for ScheduledFaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledFaults")
            .field("pending", &self.plan.lock().len())
            .field("fired", &self.fired.lock().len())
            .finish()
    }
}

impl ScheduledFaults {
    /// Create an injector from a fault plan
    pub fn new(plan: Vec<PlannedFault>) -> Self {
        Self {
            plan: Mutex::new(plan),
            fired: Mutex::new(Vec::new()),
        }
    }

    /// `(replica, key)` of every fault applied so far
    pub fn fired(&self) -> Vec<(usize, ParamKey)> {
        self.fired.lock().clone()
    }
}

impl FaultInjector for ScheduledFaults {
    fn inject(&self, replica: usize, mut site: FaultSite<'_>) {
        let key = site.key();
        let kind = {
            let mut plan = self.plan.lock();
            match plan.iter_mut().find(|f| f.matches(replica, key)) {
                Some(fault) => {
                    fault.times -= 1;
                    fault.kind
                }
                None => return,
            }
        };

        match kind {
            FaultKind::FlipLive(mask) => site.flip_live(mask),
            FaultKind::CorruptShards(n) => {
                for i in 0..n.min(site.shard_count()) {
                    site.corrupt_shard(i, 0xA5);
                }
            }
            FaultKind::FlipLiveAndCorruptShards(mask, n) => {
                site.flip_live(mask);
                for i in 0..n.min(site.shard_count()) {
                    site.corrupt_shard(i, 0xA5);
                }
            }
        }
        self.fired.lock().push((replica, key));
    }
}

// =============================================================================
// Random Bit Flips
// =============================================================================

/// Seeded injector flipping random bits at a fixed per-read rate
pub struct RandomBitFlips {
    rng: Mutex<StdRng>,
    live_rate: f64,
    shard_rate: f64,
    max_shards: usize,
    injected: Mutex<u64>,
}

impl fmt::Debug for RandomBitFlips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomBitFlips")
            .field("live_rate", &self.live_rate)
            .field("shard_rate", &self.shard_rate)
            .field("max_shards", &self.max_shards)
            .finish()
    }
}

impl RandomBitFlips {
    /// Create an injector
    ///
    /// # Arguments
    /// * `seed` - RNG seed, for reproducible drills
    /// * `live_rate` - probability that a read sees one flipped bit in its live value
    /// * `shard_rate` - probability that a read sees damaged shards
    /// * `max_shards` - upper bound on shards damaged per read
    pub fn new(seed: u64, live_rate: f64, shard_rate: f64, max_shards: usize) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            live_rate: live_rate.clamp(0.0, 1.0),
            shard_rate: shard_rate.clamp(0.0, 1.0),
            max_shards,
            injected: Mutex::new(0),
        }
    }

    /// Number of reads corrupted so far
    pub fn injected(&self) -> u64 {
        *self.injected.lock()
    }
}

impl FaultInjector for RandomBitFlips {
    fn inject(&self, _replica: usize, mut site: FaultSite<'_>) {
        let mut rng = self.rng.lock();
        let mut hit = false;

        if rng.gen_bool(self.live_rate) {
            site.flip_live(1u64 << rng.gen_range(0..64));
            hit = true;
        }

        let shard_count = site.shard_count();
        if self.max_shards > 0 && shard_count > 0 && rng.gen_bool(self.shard_rate) {
            let n = rng.gen_range(1..=self.max_shards.min(shard_count));
            for index in sample(&mut *rng, shard_count, n) {
                site.corrupt_shard(index, 1u8 << rng.gen_range(0..8));
            }
            hit = true;
        }

        if hit {
            *self.injected.lock() += 1;
        }
    }
}
