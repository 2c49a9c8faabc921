//! Coverage for engine behaviors not exercised by the main scenario
//! suite: config presets, vector-index contract violations, and the
//! manifest's legacy (level-less) record format.

use coreengine::config::{EngineConfig, VectorMetric};
use coreengine::disk_manager::DiskManager;
use coreengine::engine::Engine;
use coreengine::manifest::Manifest;
use coreengine::page::PAGE_SIZE;
use tempfile::tempdir;

#[test]
fn embedded_preset_syncs_every_write() {
    let cfg = EngineConfig::embedded("/tmp/unused-coreengine-test-path");
    assert_eq!(cfg.wal_sync_mode, coreengine::config::WalSyncMode::EveryWrite);
    assert!(!cfg.enable_vector_index);
}

#[test]
fn production_preset_uses_larger_buffer_pool() {
    let cfg = EngineConfig::production("/tmp/unused-coreengine-test-path-2");
    assert_eq!(cfg.buffer_pool_size, 16384);
}

#[test]
fn vector_put_without_index_enabled_is_unimplemented() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    let err = engine.put_vector(b"k".to_vec(), vec![1.0, 2.0]).unwrap_err();
    assert!(matches!(err, coreengine::error::CoreError::Unimplemented(_)));
}

#[test]
fn vector_insert_dimension_mismatch_is_rejected() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::embedded(dir.path()).with_vector_index(4, VectorMetric::Cosine);
    let engine = Engine::open(config).unwrap();
    assert!(engine.put_vector(b"k".to_vec(), vec![1.0, 2.0]).is_err());
    assert_eq!(engine.get_vector_stats().unwrap(), 0);
}

#[test]
fn vector_duplicate_key_insert_is_rejected() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::embedded(dir.path()).with_vector_index(2, VectorMetric::Cosine);
    let engine = Engine::open(config).unwrap();
    engine.put_vector(b"k".to_vec(), vec![1.0, 0.0]).unwrap();
    assert!(engine.put_vector(b"k".to_vec(), vec![0.0, 1.0]).is_err());
}

#[test]
fn get_vector_returns_the_stored_vector_by_key() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::embedded(dir.path()).with_vector_index(2, VectorMetric::Cosine);
    let engine = Engine::open(config).unwrap();
    engine.put_vector(b"k".to_vec(), vec![1.0, 0.0]).unwrap();

    let found = engine.get_vector(b"k").unwrap().unwrap();
    assert_eq!(found.as_slice(), &[1.0, 0.0]);
    assert_eq!(engine.get_vector(b"missing").unwrap(), None);
}

#[test]
fn batch_get_vectors_returns_independent_results() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::embedded(dir.path()).with_vector_index(2, VectorMetric::Cosine);
    let engine = Engine::open(config).unwrap();
    engine.put_vector(b"a".to_vec(), vec![1.0, 0.0]).unwrap();
    engine.put_vector(b"b".to_vec(), vec![0.0, 1.0]).unwrap();

    let results = engine
        .batch_get_vectors(&[b"a".to_vec(), b"missing".to_vec(), b"b".to_vec()])
        .unwrap();
    assert_eq!(results[0].as_ref().unwrap().as_slice(), &[1.0, 0.0]);
    assert_eq!(results[1], None);
    assert_eq!(results[2].as_ref().unwrap().as_slice(), &[0.0, 1.0]);
}

#[test]
fn manifest_accepts_legacy_records_without_a_level() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("MANIFEST");
    std::fs::write(&path, "ADD 1\nADD 2\nREMOVE 1\n").unwrap();
    let manifest = Manifest::open(&path).unwrap();
    assert_eq!(manifest.live_set(), std::collections::BTreeSet::from([2]));
    assert_eq!(manifest.level_of(2), None);
}

#[test]
fn manifest_rejects_unknown_command_token() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("MANIFEST");
    std::fs::write(&path, "BOGUS 1\n").unwrap();
    assert!(Manifest::open(&path).is_err());
}

#[test]
fn disk_manager_rejects_file_size_not_a_multiple_of_page_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pages.dat");
    std::fs::write(&path, vec![0u8; PAGE_SIZE + 1]).unwrap();
    assert!(DiskManager::open(&path).is_err());
}

#[test]
fn get_all_entries_excludes_deleted_keys() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.delete(b"a").unwrap();

    let entries = engine.get_all_entries().unwrap();
    let keys: Vec<_> = entries.iter().map(|kv| kv.key.clone()).collect();
    assert_eq!(keys, vec![b"b".to_vec()]);
}

#[test]
fn scan_keys_only_returns_empty_values() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::embedded(dir.path())).unwrap();
    engine.put(b"a", b"value").unwrap();
    let rows = engine
        .scan(
            None,
            None,
            coreengine::engine::ScanOptions {
                keys_only: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(rows[0].key, b"a");
    assert!(rows[0].value.is_empty());
}
