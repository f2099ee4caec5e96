//! Replicas
//!
//! A replica is one independent run of validate, encode and label. The harness
//! gives each replica its own copy of the request, its own [`ParameterStore`]
//! and a cancellation token tied to the shared deadline.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::CounterConfig;
use crate::ec::store::{LastKnownGood, ParameterStore};
use crate::error::{Error, Result};
use crate::faults::FaultInjector;
use crate::grid::{validate, CountRequest};
use crate::labeler;

/// Everything one replica may touch
pub struct ReplicaContext {
    /// Replica index, `0..3`
    pub index: usize,
    /// Private copy of the caller's request
    pub request: CountRequest,
    pub config: Arc<CounterConfig>,
    /// Shared last-known-good values; read-only for replicas
    pub last_known_good: Arc<LastKnownGood>,
    pub injector: Arc<dyn FaultInjector>,
    /// Cancelled when the deadline passes
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

impl ReplicaContext {
    /// Fresh parameter store for one attempt
    pub fn store(&self) -> Result<ParameterStore> {
        Ok(ParameterStore::new(&self.config, self.last_known_good.clone())?
            .with_injector(self.injector.clone())
            .with_cancellation(self.cancel.clone())
            .for_replica(self.index))
    }

    /// Whether another attempt may still start
    pub fn has_time(&self) -> bool {
        !self.cancel.is_cancelled() && Instant::now() < self.deadline
    }
}

/// One counting computation run under the harness
pub trait Replica: Send + Sync + 'static {
    /// Produce a count, reading protected values through `store`
    fn count(&self, ctx: &ReplicaContext, store: &mut ParameterStore) -> Result<u64>;
}

/// Validate, encode and flood-fill
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingReplica;

impl Replica for CountingReplica {
    fn count(&self, ctx: &ReplicaContext, store: &mut ParameterStore) -> Result<u64> {
        let valid = validate(&ctx.request)?;
        labeler::count_valid(&valid, store, &ctx.cancel)
    }
}

/// Why a replica produced no count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The request was malformed
    Validation(String),
    /// A protected value could not be recovered
    Corruption(String),
    /// One or more component expansions failed
    Traversal { failed_expansions: usize },
    /// The replica missed the deadline
    Timeout,
    /// The replica was cancelled before finishing
    Cancelled,
    /// The replica panicked
    Panicked(String),
    /// Any other failure
    Internal(String),
}

impl From<&Error> for FallbackReason {
    fn from(err: &Error) -> Self {
        match err {
            Error::Validation(e) => FallbackReason::Validation(e.to_string()),
            Error::Degraded { .. }
            | Error::Corruption { .. }
            | Error::InsufficientShards { .. }
            | Error::OutOfBounds { .. } => FallbackReason::Corruption(err.to_string()),
            Error::Traversal { failed_expansions } => FallbackReason::Traversal {
                failed_expansions: *failed_expansions,
            },
            Error::Timeout { .. } => FallbackReason::Timeout,
            Error::Cancelled => FallbackReason::Cancelled,
            other => FallbackReason::Internal(other.to_string()),
        }
    }
}

/// What one replica contributed to the vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaOutcome {
    /// Number of objects found
    Count(u64),
    /// No count was produced
    Fallback(FallbackReason),
}

impl ReplicaOutcome {
    /// The count, if any
    pub fn count(&self) -> Option<u64> {
        match self {
            ReplicaOutcome::Count(n) => Some(*n),
            ReplicaOutcome::Fallback(_) => None,
        }
    }

    /// Whether the replica fell back
    pub fn is_fallback(&self) -> bool {
        matches!(self, ReplicaOutcome::Fallback(_))
    }
}

impl From<Result<u64>> for ReplicaOutcome {
    fn from(result: Result<u64>) -> Self {
        match result {
            Ok(n) => ReplicaOutcome::Count(n),
            Err(e) => ReplicaOutcome::Fallback(FallbackReason::from(&e)),
        }
    }
}
