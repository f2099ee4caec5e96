//! Error Correction Module
//!
//! Every value the labeler touches is held twice: once live, and once as a
//! checksummed Reed-Solomon block written when the value was created.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       Error Correction Module                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                       │
//! │  ┌──────────────────┐   read()   ┌──────────────────────────────┐    │
//! │  │  ProtectedValue  │ ─────────► │       ParameterStore         │    │
//! │  │  live + block    │ ◄───────── │  reconcile / last-known-good │    │
//! │  └──────────────────┘  repaired  └──────────────┬───────────────┘    │
//! │                                                 │                     │
//! │                                    ┌────────────┴────────────┐        │
//! │                                    │   Encoder / Decoder     │        │
//! │                                    │  k data + m parity,     │        │
//! │                                    │  xxh3 per shard         │        │
//! │                                    └─────────────────────────┘        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Encoder/Decoder** (`encoder.rs`): Reed-Solomon coding over GF(2^8)
//!   using the `reed-solomon-erasure` crate:
//!   - Split a payload into k data shards plus m parity shards
//!   - Seal each shard with a position-bound checksum
//!   - Erase shards failing their checksum and rebuild them from survivors
//!
//! - **Protected Values** (`protected.rs`): a live value paired with its
//!   encoded block, reconciled on every read.
//!
//! - **Parameter Store** (`store.rs`): per-replica reconciliation, counters and
//!   the last-known-good fallback for blocks damaged beyond m shards.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use objguard::config::CounterConfig;
//! use objguard::ec::{LastKnownGood, ParamKey, ParameterStore, ProtectedValue};
//!
//! let mut store = ParameterStore::new(&CounterConfig::default(), Arc::new(LastKnownGood::new()))?;
//! let mut threshold = ProtectedValue::new(ParamKey::Threshold, 0.5f64, &store)?;
//!
//! // A soft error flips a bit of the live copy.
//! threshold.corrupt_live(1 << 62);
//!
//! assert_eq!(threshold.read(&mut store)?, 0.5);
//! assert_eq!(store.stats().corrections, 1);
//! # Ok::<(), objguard::Error>(())
//! ```

pub mod encoder;
pub mod protected;
pub mod store;

#[cfg(test)]
mod proptest;

pub use encoder::{EcDecoder, EcEncoder, Shard};
pub use protected::{EncodedBlock, Protectable, ProtectedValue};
pub use store::{LastKnownGood, ParamKey, ParameterStore, StoreStats};
