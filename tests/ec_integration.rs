//! EC Integration Tests
//!
//! End-to-end tests for the checksummed Reed-Solomon code and the redundant
//! parameter store.

use std::sync::Arc;

use objguard::config::CounterConfig;
use objguard::ec::encoder::{EcDecoder, EcEncoder};
use objguard::ec::{LastKnownGood, ParamKey, ParameterStore, ProtectedValue};
use objguard::Error;

// =============================================================================
// Encoder/Decoder Integration Tests
// =============================================================================

#[test]
fn test_encode_decode_full_pipeline() {
    let encoder = EcEncoder::new(8, 4).expect("Failed to create encoder");
    let decoder = EcDecoder::new(8, 4).expect("Failed to create decoder");

    let original = 0.75f64.to_bits().to_le_bytes();
    let shards = encoder.encode(&original).expect("Failed to encode");
    assert_eq!(shards.len(), 12);
    assert!(shards.iter().enumerate().all(|(i, s)| s.is_intact(i)));

    let decoded = decoder.decode(&shards, original.len()).expect("Failed to decode");
    assert_eq!(decoded.data, original);
    assert!(!decoded.was_repaired());
}

#[test]
fn test_decode_with_max_corruption() {
    let encoder = EcEncoder::new(8, 4).expect("Failed to create encoder");
    let decoder = EcDecoder::new(8, 4).expect("Failed to create decoder");

    let original = 123_456u64.to_le_bytes();
    let pristine = encoder.encode(&original).expect("Failed to encode");

    // Two data shards and two parity shards.
    let mut shards = pristine.clone();
    for i in [0, 5, 8, 11] {
        shards[i].bytes[0] ^= 0x3C;
    }

    let decoded = decoder.decode(&shards, original.len()).expect("Failed to decode");
    assert_eq!(decoded.data, original);
    assert_eq!(decoded.repaired, vec![0, 5, 8, 11]);
    assert_eq!(decoded.shards, pristine);
}

#[test]
fn test_decode_beyond_capacity_fails() {
    let encoder = EcEncoder::new(8, 2).expect("Failed to create encoder");
    let decoder = EcDecoder::new(8, 2).expect("Failed to create decoder");

    let mut shards = encoder.encode(&7u64.to_le_bytes()).expect("Failed to encode");
    for shard in shards.iter_mut().take(3) {
        shard.bytes[0] ^= 0xFF;
    }

    let result = decoder.decode(&shards, 8);
    assert!(matches!(
        result,
        Err(Error::InsufficientShards {
            available: 7,
            required: 8
        })
    ));
}

#[test]
fn test_different_codec_shapes() {
    for (k, m) in [(1, 1), (2, 4), (4, 4), (8, 10), (8, 32)] {
        let encoder = EcEncoder::new(k, m).expect("Failed to create encoder");
        let decoder = EcDecoder::new(k, m).expect("Failed to create decoder");

        let original = u64::MAX.to_le_bytes();
        let mut shards = encoder.encode(&original).expect("Failed to encode");
        for shard in shards.iter_mut().rev().take(m) {
            shard.bytes[0] ^= 0x01;
        }

        let decoded = decoder.decode(&shards, original.len()).expect("Failed to decode");
        assert_eq!(decoded.data, original, "codec {}+{}", k, m);
    }
}

// =============================================================================
// Parameter Store Integration Tests
// =============================================================================

#[test]
fn test_protected_grid_parameters_survive_corruption() {
    let config = CounterConfig::high_assurance();
    let mut store = ParameterStore::new(&config, Arc::new(LastKnownGood::new()))
        .expect("Failed to create store");

    let mut width = ProtectedValue::new(ParamKey::Width, 640usize, &store).expect("encode width");
    let mut threshold =
        ProtectedValue::new(ParamKey::Threshold, 0.35f64, &store).expect("encode threshold");

    width.corrupt_live(1 << 40);
    for shard in threshold.block_mut().shards_mut().iter_mut().take(10) {
        shard.bytes[0] ^= 0x55;
    }

    assert_eq!(width.read(&mut store).expect("read width"), 640);
    assert_eq!(threshold.read(&mut store).expect("read threshold"), 0.35);

    let stats = store.stats();
    assert_eq!(stats.corrections, 1);
    assert_eq!(stats.block_repairs, 1);
    assert_eq!(stats.degraded, 0);
}

#[test]
fn test_overlay_feeds_shared_cache_only_when_absorbed() {
    let shared = Arc::new(LastKnownGood::new());
    let mut store = ParameterStore::new(&CounterConfig::default(), shared.clone())
        .expect("Failed to create store");

    let mut height = ProtectedValue::new(ParamKey::Height, 48usize, &store).expect("encode");
    height.corrupt_live(0b1);
    assert_eq!(height.read(&mut store).expect("read"), 48);
    assert!(shared.is_empty());

    let (overlay, _) = store.into_parts();
    shared.absorb(overlay);
    assert_eq!(shared.get_value::<usize>(ParamKey::Height), Some(48));
}

#[test]
fn test_shared_cache_rescues_unrecoverable_block() {
    let shared = Arc::new(LastKnownGood::new());
    shared.insert(ParamKey::Threshold, 0.5f64);
    let mut store =
        ParameterStore::new(&CounterConfig::default(), shared).expect("Failed to create store");

    let mut threshold = ProtectedValue::new(ParamKey::Threshold, 0.5f64, &store).expect("encode");
    for shard in threshold.block_mut().shards_mut().iter_mut() {
        shard.bytes[0] ^= 0x0F;
    }

    assert_eq!(threshold.read(&mut store).expect("read"), 0.5);
    assert_eq!(store.stats().lkg_substitutions, 1);

    // The block was rebuilt from the fallback, so the next read is clean.
    assert_eq!(threshold.read(&mut store).expect("read"), 0.5);
    assert_eq!(store.stats().lkg_substitutions, 1);
}
