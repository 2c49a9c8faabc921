//! Engine configuration, preset factories, and the log-level environment hook.

use std::path::PathBuf;

pub use crate::vector::VectorMetric;

/// Durability/performance trade-off for the WAL surfaces and page writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncMode {
    /// Never fsync explicitly; rely on the OS to eventually flush.
    None,
    /// Fsync after every append. Matches the write-ahead rule exactly.
    EveryWrite,
    /// Fsync on a caller-driven cadence (e.g. once per batch or timer tick).
    Periodic,
}

/// Tuning parameters for HNSW graph construction and search.
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Max bidirectional edges per node at layers >= 1 (layer 0 gets `2*m`).
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Max number of layers a node may occupy.
    pub max_layers: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_layers: 16,
        }
    }
}

/// Top-level engine configuration.
///
/// Every numeric default named by the component design (L0 compaction
/// trigger, level size base, LRU-K's `K`, MemTable flush threshold) has
/// an explicit field here rather than a hidden literal buried in a
/// module.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base directory for the database.
    pub root_dir: PathBuf,
    /// Override for the page/SSTable directory; defaults to `root_dir`.
    pub data_dir: Option<PathBuf>,
    /// Override for the WAL directory; defaults to `root_dir`.
    pub wal_dir: Option<PathBuf>,

    /// Number of 4 KB frames in the buffer pool.
    pub buffer_pool_size: usize,
    /// The `K` in LRU-K.
    pub lru_k: usize,
    /// Reserved for a future block cache; informational only in the core.
    pub block_cache_size_bytes: usize,

    pub wal_sync_mode: WalSyncMode,

    /// MemTable flush threshold, in bytes.
    pub write_buffer_size: usize,
    /// Number of L0 SSTables that triggers L0->L1 compaction.
    pub l0_compaction_trigger: usize,
    /// Target byte size of level 1; level i scales by 10^(i-1).
    pub level_size_base_bytes: u64,

    pub enable_vector_index: bool,
    pub vector_dimension: usize,
    pub vector_metric: VectorMetric,
    pub hnsw_params: HnswParams,
}

impl EngineConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| self.root_dir.clone())
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.wal_dir.clone().unwrap_or_else(|| self.root_dir.clone())
    }

    /// Single directory, fsync on every write. Suitable for a locally
    /// embedded database prioritizing simplicity over throughput.
    pub fn embedded(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            data_dir: None,
            wal_dir: None,
            buffer_pool_size: 1024,
            lru_k: 2,
            block_cache_size_bytes: 64 * 1024 * 1024,
            wal_sync_mode: WalSyncMode::EveryWrite,
            write_buffer_size: 4 * 1024 * 1024,
            l0_compaction_trigger: 4,
            level_size_base_bytes: 10 * 1024 * 1024,
            enable_vector_index: false,
            vector_dimension: 0,
            vector_metric: VectorMetric::Cosine,
            hnsw_params: HnswParams::default(),
        }
    }

    /// Split `data/` and `wal/` under separate roots, fsync on every write.
    pub fn production(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        Self {
            data_dir: Some(root_dir.join("data")),
            wal_dir: Some(root_dir.join("wal")),
            buffer_pool_size: 16384,
            ..Self::embedded(root_dir)
        }
    }

    /// Single directory, no sync. Fast and unsafe across crashes; for
    /// local iteration only.
    pub fn development(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_sync_mode: WalSyncMode::None,
            ..Self::embedded(root_dir)
        }
    }

    pub fn with_vector_index(mut self, dimension: usize, metric: VectorMetric) -> Self {
        self.enable_vector_index = true;
        self.vector_dimension = dimension;
        self.vector_metric = metric;
        self
    }
}

/// Environment variable overriding the default log threshold.
pub const LOG_LEVEL_ENV_VAR: &str = "CORE_ENGINE_LOG_LEVEL";

/// Reads [`LOG_LEVEL_ENV_VAR`] and returns a `tracing` filter directive
/// string, defaulting to `info` when unset or unrecognized.
///
/// This is the process-wide mutable log-level threshold described by
/// the design notes: it affects verbosity only, never correctness.
pub fn log_level_from_env() -> String {
    match std::env::var(LOG_LEVEL_ENV_VAR) {
        Ok(v) => {
            let v = v.to_lowercase();
            if matches!(v.as_str(), "debug" | "info" | "warn" | "error") {
                v
            } else {
                "info".to_string()
            }
        }
        Err(_) => "info".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_in_sync_mode() {
        let embedded = EngineConfig::embedded("/tmp/db1");
        let dev = EngineConfig::development("/tmp/db2");
        assert_eq!(embedded.wal_sync_mode, WalSyncMode::EveryWrite);
        assert_eq!(dev.wal_sync_mode, WalSyncMode::None);
    }

    #[test]
    fn production_splits_directories() {
        let cfg = EngineConfig::production("/tmp/db3");
        assert_eq!(cfg.data_dir(), PathBuf::from("/tmp/db3/data"));
        assert_eq!(cfg.wal_dir(), PathBuf::from("/tmp/db3/wal"));
    }
}
