//! objguard - Fault-Tolerant Object Counting
//!
//! Counts connected regions of above-threshold cells in an intensity grid
//! while tolerating soft errors, stalled computations and malformed input.
//! The caller always gets a non-negative count or `-1`, never a panic.
//!
//! # Architecture
//!
//! ```text
//! caller → Harness ─┬─ replica 0: Validator → ParameterStore → Labeler ─┐
//!                   ├─ replica 1: Validator → ParameterStore → Labeler ─┼→ vote → caller
//!                   └─ replica 2: Validator → ParameterStore → Labeler ─┘
//! ```
//!
//! # Modules
//!
//! - [`grid`] - Caller requests, typed grids and the validator
//! - [`ec`] - Error-correcting encoding and the redundant parameter store
//! - [`labeler`] - Flood-fill connected-component counting
//! - [`harness`] - Triple-replica execution with deadline and majority vote
//! - [`faults`] - Soft-error injection for tests and resilience drills
//! - [`config`] - Deployment configuration
//! - [`telemetry`] - Log subscriber setup
//! - [`error`] - Error types

pub mod config;
pub mod ec;
pub mod error;
pub mod faults;
pub mod grid;
pub mod harness;
pub mod labeler;
pub mod telemetry;

use std::time::Duration;

use tracing::warn;

// Re-export commonly used types
pub use config::CounterConfig;
pub use error::{Error, Result, ValidationError};
pub use grid::{CountRequest, OccupancyGrid, Threshold, ValidGrid};
pub use harness::{HarnessReport, ObjectCounter, Verdict};

/// Value returned when no trustworthy count exists
pub const FALLBACK_COUNT: i64 = -1;

/// Count objects in `grid`, blocking the calling thread.
///
/// Builds a single-threaded runtime for the call and shuts it down with a
/// bounded grace period, so an abandoned replica never holds the caller.
/// Returns `-1` on malformed input, full degradation, invalid configuration or
/// when called from inside an async runtime; use [`ObjectCounter`] there.
pub fn count_objects(
    grid: Vec<Vec<f64>>,
    width: i64,
    height: i64,
    threshold: f64,
    deadline: Duration,
    correction_capacity: usize,
) -> i64 {
    if tokio::runtime::Handle::try_current().is_ok() {
        warn!("count_objects called inside an async runtime, use ObjectCounter instead");
        return FALLBACK_COUNT;
    }

    let config = CounterConfig::default()
        .with_deadline(deadline)
        .with_correction_capacity(correction_capacity);
    let counter = match ObjectCounter::new(config) {
        Ok(counter) => counter,
        Err(e) => {
            warn!("Rejected counter configuration: {}", e);
            return FALLBACK_COUNT;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("Failed to build runtime: {}", e);
            return FALLBACK_COUNT;
        }
    };

    let request = CountRequest::from_rows(grid, width, height, threshold);
    let value = runtime.block_on(counter.count(request));
    runtime.shutdown_timeout(counter.config().shutdown_grace());
    value
}
