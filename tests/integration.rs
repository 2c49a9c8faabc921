//! End-to-end scenarios against the public [`Engine`] façade, mirroring
//! the concrete scenarios named in the storage kernel's test plan:
//! put/get, delete-hides-value, crash-recovery via WAL replay,
//! flush-and-compaction, and scan with limit/reverse.

use coreengine::config::{EngineConfig, VectorMetric};
use coreengine::engine::{Engine, ScanOptions};
use tempfile::tempdir;

#[test]
fn put_get_roundtrip() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();

    engine.put(b"alpha", b"1").unwrap();
    assert_eq!(engine.get(b"alpha").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"beta").unwrap(), None);
}

#[test]
fn delete_hides_older_value() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();

    engine.put(b"k", b"v1").unwrap();
    engine.delete(b"k").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), None);
}

#[test]
fn crash_recover_replays_wal_on_reopen() {
    let dir = tempdir().unwrap();
    {
        let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        // No explicit close: the engine has no close-time flush to
        // skip, so dropping here simulates a crash after the last
        // durable write.
    }
    let reopened = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    assert_eq!(reopened.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(reopened.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn flush_and_compaction_preserve_values() {
    let dir = tempdir().unwrap();
    let mut config = EngineConfig::embedded(dir.path());
    config.write_buffer_size = 16 * 1024;
    config.l0_compaction_trigger = 4;
    let engine = Engine::open(config).unwrap();

    for i in 0..5000u32 {
        let key = format!("key_{i:04}");
        let value = vec![0xABu8; 1024];
        engine.put(key.as_bytes(), &value).unwrap();
    }

    assert!(engine.get_stats().live_sstable_count > 0);
    assert_eq!(
        engine.get(b"key_0100").unwrap(),
        Some(vec![0xABu8; 1024]),
        "key inserted before any compaction must survive it"
    );

    let before = engine.get_stats().live_sstable_count;
    // Push further inserts so L0's compaction trigger fires at least once more.
    for i in 5000..9000u32 {
        let key = format!("key_{i:04}");
        engine.put(key.as_bytes(), &[0u8; 1024]).unwrap();
    }
    let after = engine.get_stats().live_sstable_count;
    assert!(after <= before + 4, "compaction should bound live sstable growth");
    assert_eq!(
        engine.get(b"key_0100").unwrap(),
        Some(vec![0xABu8; 1024]),
        "value must survive subsequent compactions"
    );
}

#[test]
fn scan_with_limit_and_reverse() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();

    for i in 0..100u32 {
        let key = format!("key_{i:02}");
        engine.put(key.as_bytes(), format!("v{i}").as_bytes()).unwrap();
    }

    let forward = engine
        .scan(Some(b"key_10"), Some(b"key_20"), ScanOptions::default())
        .unwrap();
    assert_eq!(forward.len(), 10);
    let forward_keys: Vec<String> = forward
        .iter()
        .map(|kv| String::from_utf8(kv.key.clone()).unwrap())
        .collect();
    assert_eq!(
        forward_keys,
        (10..20).map(|i| format!("key_{i:02}")).collect::<Vec<_>>()
    );

    let reversed = engine
        .scan(
            Some(b"key_10"),
            Some(b"key_20"),
            ScanOptions {
                reverse: true,
                ..Default::default()
            },
        )
        .unwrap();
    let reversed_keys: Vec<String> = reversed
        .iter()
        .map(|kv| String::from_utf8(kv.key.clone()).unwrap())
        .collect();
    assert_eq!(
        reversed_keys,
        (10..20).rev().map(|i| format!("key_{i:02}")).collect::<Vec<_>>()
    );
}

#[test]
fn scan_limit_truncates_output() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    for i in 0..10u32 {
        engine.put(format!("k{i:02}").as_bytes(), b"v").unwrap();
    }
    let limited = engine
        .scan(
            None,
            None,
            ScanOptions {
                limit: 3,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(limited.len(), 3);
}

#[test]
fn hnsw_near_duplicate_search_returns_exact_match_first() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::embedded(dir.path()).with_vector_index(128, VectorMetric::Euclidean);
    let engine = Engine::open(config).unwrap();

    let mut rng_state = 0x1234_5678u64;
    let mut next_f32 = || {
        rng_state = rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((rng_state >> 40) as f32 / (1u64 << 24) as f32) - 1.0
    };

    let mut target = None;
    for i in 0..500u32 {
        let vector: Vec<f32> = (0..128).map(|_| next_f32()).collect();
        if i == 250 {
            target = Some(vector.clone());
        }
        engine.put_vector(format!("vec_{i}").into_bytes(), vector).unwrap();
    }

    let results = engine.search_similar(&target.unwrap(), 5).unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].0, b"vec_250".to_vec());
    assert!(results[0].1 < 1e-3);
    for pair in results.windows(2) {
        assert!(pair[0].1 <= pair[1].1 + 1e-6, "results must be non-decreasing by distance");
    }
}

#[test]
fn batch_write_is_atomic_and_single_sync() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();

    let ops: Vec<(Vec<u8>, Option<Vec<u8>>)> = vec![
        (b"a".to_vec(), Some(b"1".to_vec())),
        (b"b".to_vec(), Some(b"2".to_vec())),
        (b"a".to_vec(), None),
    ];
    engine.batch_write(&ops).unwrap();

    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn batch_write_empty_list_is_a_no_op() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    engine.batch_write(&[]).unwrap();
    assert_eq!(engine.get_stats().put_count, 0);
}

#[test]
fn batch_get_returns_independent_results() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    engine.put(b"a", b"1").unwrap();
    let results = engine
        .batch_get(&[b"a".to_vec(), b"missing".to_vec()])
        .unwrap();
    assert_eq!(results, vec![Some(b"1".to_vec()), None]);
}

#[test]
fn opening_an_empty_directory_yields_an_empty_database() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    assert_eq!(engine.get_stats().live_sstable_count, 0);
    assert!(engine.get_all_entries().unwrap().is_empty());
}

#[test]
fn wal_with_single_put_restores_it_on_reopen() {
    let dir = tempdir().unwrap();
    {
        let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
        engine.put(b"only", b"value").unwrap();
    }
    let reopened = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    assert_eq!(reopened.get(b"only").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn development_preset_does_not_sync_but_still_persists_in_process() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::development(dir.path())).unwrap();
    engine.put(b"x", b"y").unwrap();
    assert_eq!(engine.get(b"x").unwrap(), Some(b"y".to_vec()));
}

#[test]
fn production_preset_splits_data_and_wal_directories() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::production(dir.path())).unwrap();
    engine.put(b"x", b"y").unwrap();
    assert!(dir.path().join("data").exists());
    assert!(dir.path().join("wal").exists());
}
