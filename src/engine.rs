//! The public façade: opens/closes the database and routes
//! Put/Get/Delete/Scan/BatchWrite through the LSM and the LSM WAL,
//! plus the vector operations over the HNSW index.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::hnsw::HnswIndex;
use crate::lsm::LeveledLsm;
use crate::manifest::Manifest;
use crate::memtable::{MemTable, MemTableEntry};
use crate::vector::Vector;
use crate::wal::{Wal, WalRecord};

/// Result row for `Scan`: `value` is empty when `ScanOptions::keys_only`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub reverse: bool,
    /// 0 means unbounded.
    pub limit: usize,
    pub keys_only: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStatsSnapshot {
    pub put_count: u64,
    pub get_count: u64,
    pub delete_count: u64,
    pub scan_count: u64,
    pub cumulative_latency_micros: u64,
    pub live_sstable_count: usize,
}

#[derive(Default)]
struct EngineStats {
    put_count: AtomicU64,
    get_count: AtomicU64,
    delete_count: AtomicU64,
    scan_count: AtomicU64,
    cumulative_latency_micros: AtomicU64,
}

impl EngineStats {
    fn record(&self, counter: &AtomicU64, elapsed: Duration) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.cumulative_latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// An embedded key-value and vector database.
///
/// `Put`/`Delete` write through the LSM WAL before mutating the
/// MemTable (the write-ahead rule), then check the flush and
/// compaction thresholds. `Get` checks the MemTable first, then the
/// LSM's SSTables in source-recency order.
pub struct Engine {
    config: EngineConfig,
    wal: Wal,
    memtable: MemTable,
    lsm: LeveledLsm,
    manifest: Arc<Manifest>,
    vector_index: Option<HnswIndex>,
    stats: EngineStats,
    /// Serializes the flush -> manifest-add -> compact -> manifest
    /// update sequence so the manifest and in-memory level structure
    /// never disagree, per the concurrency model.
    flush_lock: Mutex<()>,
    /// Set while a batch is open; `put`/`delete` defer their WAL sync
    /// in that window, and `end_batch` performs the single sync.
    batch_open: std::sync::atomic::AtomicBool,
}

impl Engine {
    #[instrument(skip(config), fields(root = %config.root_dir.display()))]
    pub fn open(config: EngineConfig) -> CoreResult<Self> {
        fs::create_dir_all(&config.root_dir)?;
        let data_dir = config.data_dir();
        let wal_dir = config.wal_dir();
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&wal_dir)?;

        let manifest = Arc::new(
            Manifest::open(data_dir.join("MANIFEST"))
                .map_err(|e| CoreError::corruption(e.to_string()))?,
        );
        let lsm = LeveledLsm::open(
            &data_dir,
            manifest.clone(),
            config.l0_compaction_trigger,
            config.level_size_base_bytes,
        )
        .map_err(|e| CoreError::corruption(e.to_string()))?;

        let wal = Wal::open(wal_dir.join("lsm.wal"), config.wal_sync_mode)
            .map_err(|e| CoreError::corruption(e.to_string()))?;
        let memtable = MemTable::new(config.write_buffer_size);
        wal.replay(|record| match record {
            WalRecord::Put { key, value } => memtable.put(key, value),
            WalRecord::Delete { key } => memtable.delete(key),
        })
        .map_err(|e| CoreError::corruption(e.to_string()))?;

        let vector_index = if config.enable_vector_index {
            Some(HnswIndex::new(
                config.vector_dimension,
                config.vector_metric,
                config.hnsw_params,
            ))
        } else {
            None
        };

        info!("engine opened");
        Ok(Engine {
            config,
            wal,
            memtable,
            lsm,
            manifest,
            vector_index,
            stats: EngineStats::default(),
            flush_lock: Mutex::new(()),
            batch_open: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn maybe_flush_and_compact(&self) -> CoreResult<()> {
        if !self.memtable.is_full() {
            return Ok(());
        }
        let _guard = self.flush_lock.lock().expect("flush lock poisoned");
        if !self.memtable.is_full() {
            return Ok(());
        }
        let entries = self.memtable.take_for_flush();
        self.lsm
            .flush_memtable(entries)
            .map_err(|e| CoreError::internal(e.to_string()))?;
        while self
            .lsm
            .maybe_compact()
            .map_err(|e| CoreError::internal(e.to_string()))?
            .is_some()
        {}
        Ok(())
    }

    fn in_batch(&self) -> bool {
        self.batch_open.load(Ordering::Acquire)
    }

    #[instrument(skip(self, value))]
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let start = std::time::Instant::now();
        if self.in_batch() {
            self.wal
                .append_put_deferred(key, value)
                .map_err(|e| CoreError::IoError(std::io::Error::other(e.to_string())))?;
        } else {
            self.wal
                .append_put(key, value)
                .map_err(|e| CoreError::IoError(std::io::Error::other(e.to_string())))?;
        }
        self.memtable.put(key.to_vec(), value.to_vec());
        if !self.in_batch() {
            self.maybe_flush_and_compact()?;
        }
        self.stats.record(&self.stats.put_count, start.elapsed());
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        let start = std::time::Instant::now();
        if self.in_batch() {
            self.wal
                .append_delete_deferred(key)
                .map_err(|e| CoreError::IoError(std::io::Error::other(e.to_string())))?;
        } else {
            self.wal
                .append_delete(key)
                .map_err(|e| CoreError::IoError(std::io::Error::other(e.to_string())))?;
        }
        self.memtable.delete(key.to_vec());
        if !self.in_batch() {
            self.maybe_flush_and_compact()?;
        }
        self.stats.record(&self.stats.delete_count, start.elapsed());
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let start = std::time::Instant::now();
        let result = match self.memtable.get(key) {
            Some(MemTableEntry::Value(v)) => Some(v),
            Some(MemTableEntry::Tombstone) => None,
            None => match self.lsm.get(key) {
                Some(MemTableEntry::Value(v)) => Some(v),
                Some(MemTableEntry::Tombstone) => None,
                None => None,
            },
        };
        self.stats.record(&self.stats.get_count, start.elapsed());
        Ok(result)
    }

    /// Applies every op under a single WAL sync at the end, bracketed
    /// with an internal [`Engine::begin_batch`]/[`Engine::end_batch`].
    pub fn batch_write(&self, ops: &[(Vec<u8>, Option<Vec<u8>>)]) -> CoreResult<()> {
        self.begin_batch()?;
        for (key, value) in ops {
            let result = match value {
                Some(v) => self.put(key, v),
                None => self.delete(key),
            };
            if let Err(e) = result {
                self.batch_open.store(false, Ordering::Release);
                return Err(e);
            }
        }
        self.end_batch()
    }

    pub fn batch_get(&self, keys: &[Vec<u8>]) -> CoreResult<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Begins a batch: subsequent `Put`/`Delete` calls defer their
    /// WAL sync until [`Engine::end_batch`], which performs the
    /// single sync and then checks flush/compaction thresholds once
    /// for the whole batch.
    pub fn begin_batch(&self) -> CoreResult<()> {
        if self.batch_open.swap(true, Ordering::AcqRel) {
            return Err(CoreError::invalid_argument("a batch is already open"));
        }
        Ok(())
    }

    pub fn end_batch(&self) -> CoreResult<()> {
        if !self.batch_open.swap(false, Ordering::AcqRel) {
            return Err(CoreError::invalid_argument("no batch is open"));
        }
        self.wal
            .flush()
            .map_err(|e| CoreError::IoError(std::io::Error::other(e.to_string())))?;
        self.maybe_flush_and_compact()
    }

    /// Forces the WAL durable regardless of the configured sync mode.
    pub fn flush(&self) -> CoreResult<()> {
        self.wal
            .flush()
            .map_err(|e| CoreError::IoError(std::io::Error::other(e.to_string())))
    }

    #[instrument(skip(self))]
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        options: ScanOptions,
    ) -> CoreResult<Vec<KeyValue>> {
        let begin = std::time::Instant::now();
        // Snapshot: MemTable entries taken first, then SSTable runs.
        // A concurrent writer between these two reads can only add
        // keys the scan misses entirely, never produce a duplicate or
        // resurrect a tombstone, matching the ordering guarantee.
        let mut merged: BTreeMap<Vec<u8>, MemTableEntry> = BTreeMap::new();
        for (k, v) in self.lsm.scan_runs(start, end) {
            merged.entry(k).or_insert(v);
        }
        for (k, v) in self.memtable.range(start, end) {
            merged.insert(k, v);
        }

        let mut rows: Vec<KeyValue> = merged
            .into_iter()
            .filter_map(|(k, v)| match v {
                MemTableEntry::Value(value) => Some(KeyValue {
                    key: k,
                    value: if options.keys_only { Vec::new() } else { value },
                }),
                MemTableEntry::Tombstone => None,
            })
            .collect();

        if options.reverse {
            rows.reverse();
        }
        if options.limit > 0 {
            rows.truncate(options.limit);
        }
        self.stats.record(&self.stats.scan_count, begin.elapsed());
        Ok(rows)
    }

    fn vector_index(&self) -> CoreResult<&HnswIndex> {
        self.vector_index
            .as_ref()
            .ok_or_else(|| CoreError::Unimplemented("vector index not enabled".to_string()))
    }

    pub fn put_vector(&self, key: Vec<u8>, vector: Vec<f32>) -> CoreResult<()> {
        self.vector_index()?
            .insert(key, vector)
            .map_err(|e| CoreError::invalid_argument(e.to_string()))
    }

    pub fn get_vector(&self, key: &[u8]) -> CoreResult<Option<Vector>> {
        Ok(self.vector_index()?.get(key).map(Vector::new))
    }

    pub fn search_similar(&self, query: &[f32], k: usize) -> CoreResult<Vec<(Vec<u8>, f32)>> {
        self.vector_index()?
            .search(query, k)
            .map_err(|e| CoreError::invalid_argument(e.to_string()))
    }

    pub fn batch_put_vectors(&self, items: Vec<(Vec<u8>, Vec<f32>)>) -> CoreResult<()> {
        let index = self.vector_index()?;
        for (key, vector) in items {
            index
                .insert(key, vector)
                .map_err(|e| CoreError::invalid_argument(e.to_string()))?;
        }
        Ok(())
    }

    pub fn batch_get_vectors(&self, keys: &[Vec<u8>]) -> CoreResult<Vec<Option<Vector>>> {
        let index = self.vector_index()?;
        Ok(keys.iter().map(|key| index.get(key).map(Vector::new)).collect())
    }

    pub fn get_vector_stats(&self) -> CoreResult<usize> {
        Ok(self.vector_index()?.len())
    }

    pub fn get_stats(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            put_count: self.stats.put_count.load(Ordering::Relaxed),
            get_count: self.stats.get_count.load(Ordering::Relaxed),
            delete_count: self.stats.delete_count.load(Ordering::Relaxed),
            scan_count: self.stats.scan_count.load(Ordering::Relaxed),
            cumulative_latency_micros: self.stats.cumulative_latency_micros.load(Ordering::Relaxed),
            live_sstable_count: self.lsm.live_sstable_count(),
        }
    }

    /// Every resident key/value pair across the MemTable and all
    /// SSTables, tombstone-filtered. Intended for small databases or
    /// diagnostics, not a production scan path.
    pub fn get_all_entries(&self) -> CoreResult<Vec<KeyValue>> {
        self.scan(None, None, ScanOptions::default())
    }

    pub fn root_dir(&self) -> &PathBuf {
        &self.config.root_dir
    }
}
