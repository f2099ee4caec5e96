//! Execution Harness
//!
//! Runs three replicas of the counting computation against one shared
//! deadline and reduces their outcomes with a majority vote.
//!
//! ```text
//!                    ┌─► replica 0 ─┐
//!  CountRequest ─────┼─► replica 1 ─┼──► majority_vote ──► HarnessReport
//!                    └─► replica 2 ─┘
//!                     (blocking pool, timeout_at(deadline))
//! ```
//!
//! A replica that misses the deadline is cancelled and its join handle is
//! dropped. Its result is never observed and the values it corrected are not
//! merged into the shared last-known-good cache. Replicas that finish in time
//! have their corrections merged, whatever their outcome.

pub mod replica;
pub mod stats;
pub mod vote;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::CounterConfig;
use crate::ec::encoder::storage_overhead;
use crate::ec::store::{LastKnownGood, ParamKey, StoreStats};
use crate::error::{Error, Result};
use crate::faults::{FaultInjector, NoFaults};
use crate::grid::CountRequest;

pub use replica::{CountingReplica, FallbackReason, Replica, ReplicaContext, ReplicaOutcome};
pub use stats::{HarnessStats, HarnessStatsSnapshot};
pub use vote::{majority_vote, Verdict, Vote};

/// Number of replicas run per request
pub const REPLICA_COUNT: usize = 3;

// =============================================================================
// Reports
// =============================================================================

/// What happened to one replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaReport {
    pub index: usize,
    pub outcome: ReplicaOutcome,
    /// Attempts made, including retries; 0 if the replica was abandoned
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Store counters, absent when the replica was abandoned
    pub store: Option<StoreStats>,
}

/// Full result of one protected invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    pub vote: Vote,
    pub replicas: Vec<ReplicaReport>,
    pub elapsed_ms: u64,
}

impl HarnessReport {
    /// Voted count, or the fallback sentinel
    pub fn value(&self) -> i64 {
        self.vote.value
    }

    /// Outcomes in replica order
    pub fn outcomes(&self) -> Vec<ReplicaOutcome> {
        self.replicas.iter().map(|r| r.outcome.clone()).collect()
    }
}

/// Result of running one replica to completion, retries included
struct ReplicaRun {
    result: Result<u64>,
    learned: HashMap<ParamKey, u64>,
    stats: StoreStats,
    attempts: u32,
}

// =============================================================================
// Object Counter
// =============================================================================

/// Fault-tolerant object counter
pub struct ObjectCounter {
    config: Arc<CounterConfig>,
    replica: Arc<dyn Replica>,
    injector: Arc<dyn FaultInjector>,
    last_known_good: Arc<LastKnownGood>,
    stats: Arc<HarnessStats>,
}

impl std::fmt::Debug for ObjectCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCounter")
            .field("config", &self.config)
            .field("last_known_good", &self.last_known_good.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl ObjectCounter {
    /// Create a counter after validating `config`
    pub fn new(config: CounterConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            "Object counter using {}+{} code ({:.2}x storage per value), deadline {}ms",
            config.data_shards,
            config.correction_capacity,
            storage_overhead(config.data_shards, config.correction_capacity),
            config.deadline_ms
        );
        Ok(Self {
            config: Arc::new(config),
            replica: Arc::new(CountingReplica),
            injector: Arc::new(NoFaults),
            last_known_good: Arc::new(LastKnownGood::new()),
            stats: Arc::new(HarnessStats::new()),
        })
    }

    /// Replace the computation run by each replica
    pub fn with_replica(mut self, replica: Arc<dyn Replica>) -> Self {
        self.replica = replica;
        self
    }

    /// Route every protected read through `injector`
    pub fn with_fault_injector(mut self, injector: Arc<dyn FaultInjector>) -> Self {
        self.injector = injector;
        self
    }

    /// Share a last-known-good cache with other counters
    pub fn with_last_known_good(mut self, cache: Arc<LastKnownGood>) -> Self {
        self.last_known_good = cache;
        self
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Last-known-good cache fed by replicas that finished in time
    pub fn last_known_good(&self) -> &Arc<LastKnownGood> {
        &self.last_known_good
    }

    pub fn stats(&self) -> HarnessStatsSnapshot {
        self.stats.snapshot()
    }

    /// Count objects; returns `-1` when no trustworthy count exists
    pub async fn count(&self, request: CountRequest) -> i64 {
        self.run_protected(request).await.value()
    }

    /// Run three replicas against one deadline and vote
    #[instrument(skip_all, fields(width = request.width, height = request.height))]
    pub async fn run_protected(&self, request: CountRequest) -> HarnessReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.deadline();

        let replicas = join_all(
            (0..REPLICA_COUNT).map(|index| self.run_replica(index, request.clone(), deadline)),
        )
        .await;

        let outcomes: Vec<ReplicaOutcome> = replicas.iter().map(|r| r.outcome.clone()).collect();
        let vote = majority_vote(&outcomes);
        self.stats.record_vote(&vote);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if vote.is_degraded() {
            warn!(
                "No replica produced a count after {}ms, returning {}",
                elapsed_ms, vote.value
            );
        } else {
            info!(
                "Counted {} objects ({:?}, {}/{} replicas agree) in {}ms",
                vote.value, vote.verdict, vote.support, REPLICA_COUNT, elapsed_ms
            );
        }

        HarnessReport {
            vote,
            replicas,
            elapsed_ms,
        }
    }

    async fn run_replica(
        &self,
        index: usize,
        request: CountRequest,
        deadline: tokio::time::Instant,
    ) -> ReplicaReport {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        let ctx = ReplicaContext {
            index,
            request,
            config: self.config.clone(),
            last_known_good: self.last_known_good.clone(),
            injector: self.injector.clone(),
            cancel: cancel.clone(),
            deadline: deadline.into_std(),
        };
        let replica = self.replica.clone();
        let retries = self.config.replica_retries;

        let handle =
            tokio::task::spawn_blocking(move || run_attempts(replica.as_ref(), &ctx, retries));

        let (outcome, attempts, store) = match timeout_at(deadline, handle).await {
            Ok(Ok(run)) => {
                self.last_known_good.absorb(run.learned);
                self.stats.record_store(&run.stats);
                self.stats.record_retries(u64::from(run.attempts.saturating_sub(1)));
                if let Err(ref e) = run.result {
                    warn!("Replica {} failed after {} attempt(s): {}", index, run.attempts, e);
                }
                (ReplicaOutcome::from(run.result), run.attempts, Some(run.stats))
            }
            Ok(Err(join_error)) => {
                let reason = if join_error.is_panic() {
                    FallbackReason::Panicked(panic_message(join_error.into_panic()))
                } else {
                    FallbackReason::Cancelled
                };
                warn!("Replica {} did not complete: {:?}", index, reason);
                (ReplicaOutcome::Fallback(reason), 0, None)
            }
            Err(_) => {
                cancel.cancel();
                self.stats.record_timeout();
                let err = Error::Timeout {
                    replica: index,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                warn!("{}, abandoning it", err);
                (ReplicaOutcome::Fallback(FallbackReason::from(&err)), 0, None)
            }
        };

        if outcome.is_fallback() {
            self.stats.record_replica_failure();
        }

        ReplicaReport {
            index,
            outcome,
            attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
            store,
        }
    }
}

/// Run a replica, retrying retryable failures while time remains
fn run_attempts(replica: &dyn Replica, ctx: &ReplicaContext, retries: u32) -> ReplicaRun {
    let mut learned = HashMap::new();
    let mut stats = StoreStats::default();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = match ctx.store() {
            Ok(mut store) => {
                let result = replica.count(ctx, &mut store);
                let (overlay, attempt_stats) = store.into_parts();
                learned.extend(overlay);
                stats.merge(&attempt_stats);
                result
            }
            Err(e) => Err(e),
        };

        match result {
            Err(ref e) if e.is_retryable() && attempts <= retries && ctx.has_time() => {
                debug!(
                    replica = ctx.index,
                    attempts,
                    error = %e,
                    "Retrying replica from a fresh encoding"
                );
            }
            result => {
                return ReplicaRun {
                    result,
                    learned,
                    stats,
                    attempts,
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
