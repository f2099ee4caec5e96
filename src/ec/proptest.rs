//! Property-Based Tests for Error Correction
//!
//! Uses proptest to verify the checksummed Reed-Solomon code and the
//! reconciliation rules of the parameter store across codec shapes, values
//! and corruption patterns.
//!
//! # Test Properties
//!
//! 1. **Roundtrip**: reconcile(encode(v), v) = v
//! 2. **Correction**: up to m corrupted shards are rebuilt bit-exactly
//! 3. **Bounded Capacity**: more than m corrupted shards never decode silently
//! 4. **Live Repair**: any flip of the live value is undone by its encoding

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;

use super::encoder::{EcDecoder, EcEncoder};
use super::protected::{ProtectedValue, PAYLOAD_LEN};
use super::store::{LastKnownGood, ParamKey, ParameterStore};
use crate::config::CounterConfig;
use crate::error::Error;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for (data_shards, correction_capacity) pairs
fn codec_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=PAYLOAD_LEN, 1usize..=10)
}

/// Strategy for distinct shard indices to corrupt, at most `max` of them
fn corruption_strategy(total_shards: usize, max: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..total_shards, 0..=max.min(total_shards)).prop_map(|mut v| {
        v.sort();
        v.dedup();
        v
    })
}

fn store(data_shards: usize, capacity: usize) -> ParameterStore {
    let config = CounterConfig {
        data_shards,
        correction_capacity: capacity,
        ..CounterConfig::default()
    };
    ParameterStore::new(&config, Arc::new(LastKnownGood::new())).unwrap()
}

// =============================================================================
// Codec Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Clean blocks decode to the encoded bytes without repairs
    #[test]
    fn prop_roundtrip_clean(
        (k, m) in codec_strategy(),
        value in any::<u64>(),
    ) {
        let encoder = EcEncoder::new(k, m).unwrap();
        let decoder = EcDecoder::new(k, m).unwrap();
        let shards = encoder.encode(&value.to_le_bytes()).unwrap();

        prop_assert_eq!(shards.len(), k + m);
        prop_assert!(encoder.verify(&shards).unwrap());

        let decoded = decoder.decode(&shards, PAYLOAD_LEN).unwrap();
        prop_assert_eq!(decoded.data.clone(), value.to_le_bytes().to_vec());
        prop_assert!(!decoded.was_repaired());
    }

    /// Any pattern of at most m corrupted shards is rebuilt bit-exactly
    #[test]
    fn prop_corrected_within_capacity(
        (k, m) in codec_strategy(),
        value in any::<u64>(),
        mask in 1u8..=255,
        seed in any::<u64>(),
    ) {
        let encoder = EcEncoder::new(k, m).unwrap();
        let decoder = EcDecoder::new(k, m).unwrap();
        let pristine = encoder.encode(&value.to_le_bytes()).unwrap();

        let victims: Vec<usize> = (0..k + m)
            .filter(|i| (seed >> (i % 64)) & 1 == 1)
            .take(m)
            .collect();
        let mut shards = pristine.clone();
        for &i in &victims {
            shards[i].bytes[0] ^= mask;
        }

        let decoded = decoder.decode(&shards, PAYLOAD_LEN).unwrap();
        prop_assert_eq!(decoded.data, value.to_le_bytes().to_vec());
        if victims.is_empty() {
            prop_assert!(decoded.shards.is_empty());
        } else {
            prop_assert_eq!(decoded.shards, pristine);
        }
        prop_assert_eq!(decoded.repaired, victims);
    }

    /// Encoding is deterministic
    #[test]
    fn prop_encoding_deterministic(
        (k, m) in codec_strategy(),
        value in any::<u64>(),
    ) {
        let encoder = EcEncoder::new(k, m).unwrap();
        let a = encoder.encode(&value.to_le_bytes()).unwrap();
        let b = encoder.encode(&value.to_le_bytes()).unwrap();
        prop_assert_eq!(a, b);
    }
}

// =============================================================================
// Capacity Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Beyond capacity the store reports degradation instead of a wrong value
    #[test]
    fn prop_beyond_capacity_degrades(
        m in 1usize..=6,
        value in any::<u64>(),
        extra in 1usize..=3,
    ) {
        let mut store = store(PAYLOAD_LEN, m);
        let mut block = store.encode(value).unwrap();
        for shard in block.shards_mut().iter_mut().take(m + extra) {
            shard.bytes[0] ^= 0x81;
        }

        let result = store.reconcile(ParamKey::ObjectCount, value, &mut block);
        prop_assert_eq!(result, Err(Error::Degraded { key: ParamKey::ObjectCount }));
    }

    /// Corruption patterns up to capacity leave the reconciled value intact
    #[test]
    fn prop_store_repairs_any_pattern(
        m in 1usize..=6,
        value in any::<u64>(),
        victims in corruption_strategy(PAYLOAD_LEN + 6, 6),
    ) {
        let mut store = store(PAYLOAD_LEN, m);
        let mut block = store.encode(value).unwrap();
        let victims: Vec<usize> = victims
            .into_iter()
            .filter(|&i| i < PAYLOAD_LEN + m)
            .take(m)
            .collect();
        for &i in &victims {
            block.shards_mut()[i].bytes[0] ^= 0x10;
        }

        prop_assert_eq!(store.reconcile(ParamKey::ObjectCount, value, &mut block).unwrap(), value);
        prop_assert_eq!(store.stats().block_repairs, u64::from(!victims.is_empty()));
    }
}

// =============================================================================
// Live Value Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Any flip of a live reading is undone on the next read
    #[test]
    fn prop_live_flip_is_repaired(
        reading in 0.0f64..1.0e6,
        mask in 1u64..,
    ) {
        let mut store = store(PAYLOAD_LEN, 4);
        let mut cell = ProtectedValue::new(ParamKey::Cell { row: 0, col: 0 }, reading, &store).unwrap();

        cell.corrupt_live(mask);
        prop_assert_eq!(cell.read(&mut store).unwrap().to_bits(), reading.to_bits());
        prop_assert_eq!(cell.peek().to_bits(), reading.to_bits());
        prop_assert_eq!(store.stats().corrections, 1);
    }
}
