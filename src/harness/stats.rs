//! Harness statistics
//!
//! Lock-free counters shared by every invocation of one counter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ec::store::StoreStats;
use crate::harness::vote::{Verdict, Vote};

/// Running totals across invocations
#[derive(Debug, Default)]
pub struct HarnessStats {
    invocations: AtomicU64,
    unanimous: AtomicU64,
    majority: AtomicU64,
    plurality: AtomicU64,
    degraded: AtomicU64,
    timeouts: AtomicU64,
    replica_failures: AtomicU64,
    retries: AtomicU64,
    corrections: AtomicU64,
    block_repairs: AtomicU64,
    lkg_substitutions: AtomicU64,
}

/// Point-in-time copy of [`HarnessStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessStatsSnapshot {
    pub invocations: u64,
    pub unanimous: u64,
    pub majority: u64,
    pub plurality: u64,
    pub degraded: u64,
    pub timeouts: u64,
    pub replica_failures: u64,
    pub retries: u64,
    pub corrections: u64,
    pub block_repairs: u64,
    pub lkg_substitutions: u64,
}

impl HarnessStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the verdict of one invocation
    pub fn record_vote(&self, vote: &Vote) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let counter = match vote.verdict {
            Verdict::Unanimous => &self.unanimous,
            Verdict::Majority => &self.majority,
            Verdict::Plurality => &self.plurality,
            Verdict::Degraded => &self.degraded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replica_failure(&self) {
        self.replica_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, retries: u64) {
        self.retries.fetch_add(retries, Ordering::Relaxed);
    }

    /// Fold in the counters of a replica that finished in time
    pub fn record_store(&self, stats: &StoreStats) {
        self.corrections.fetch_add(stats.corrections, Ordering::Relaxed);
        self.block_repairs.fetch_add(stats.block_repairs, Ordering::Relaxed);
        self.lkg_substitutions
            .fetch_add(stats.lkg_substitutions, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HarnessStatsSnapshot {
        HarnessStatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            unanimous: self.unanimous.load(Ordering::Relaxed),
            majority: self.majority.load(Ordering::Relaxed),
            plurality: self.plurality.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            replica_failures: self.replica_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            block_repairs: self.block_repairs.load(Ordering::Relaxed),
            lkg_substitutions: self.lkg_substitutions.load(Ordering::Relaxed),
        }
    }
}
