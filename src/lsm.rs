//! Leveled LSM-tree: organizes SSTables into L0..Ln, triggers and
//! performs compaction, and keeps the manifest in sync with the
//! resulting set of files.
//!
//! L0 holds up to `l0_compaction_trigger` SSTables with overlapping
//! key ranges, newest first. L1..Ln hold pairwise key-disjoint runs,
//! each level size-bounded to `level_size_base_bytes * 10^(i-1)`.
//!
//! The merge during compaction is a heap-based k-way merge over
//! per-source sorted streams, directly modeled on the teacher's
//! `engine::utils::MergeIterator`, simplified from that module's
//! Put/Delete/RangeDelete record space down to this crate's
//! Put/Delete-only model, and keyed by source recency rather than LSN
//! (recency is a property of which source a run came from, already
//! encoded by its position in the merge's input list).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, info};

use crate::manifest::{resolve_sstable_path, Manifest, ManifestError, SstId};
use crate::memtable::MemTableEntry;
use crate::sstable::{SstableError, SstableReader, SstableWriter};

#[derive(Error, Debug)]
pub enum CompactionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sstable error: {0}")]
    Sstable(#[from] SstableError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

pub type Result<T> = std::result::Result<T, CompactionError>;

/// Output of a single compaction invocation: ids added and removed.
/// The caller (the engine façade) updates the manifest with these in
/// the order returned, so a crash between file write and manifest
/// update never orphans a live id.
#[derive(Debug, Default)]
pub struct CompactionResult {
    pub added: Vec<SstId>,
    pub removed: Vec<SstId>,
}

struct Run {
    id: SstId,
    level: u32,
    reader: Arc<SstableReader>,
}

impl Run {
    fn path(&self, data_dir: &Path) -> PathBuf {
        data_dir
            .join(format!("level_{}", self.level))
            .join(format!("{}.sst", self.id))
    }

    fn byte_size(&self, data_dir: &Path) -> u64 {
        fs::metadata(self.path(data_dir)).map(|m| m.len()).unwrap_or(0)
    }
}

pub struct LeveledLsm {
    data_dir: PathBuf,
    manifest: Arc<Manifest>,
    next_id: AtomicU32,
    /// `levels[0]` is L0, newest-first. `levels[i]` for i >= 1 is
    /// sorted ascending by min key (pairwise disjoint by invariant).
    levels: RwLock<Vec<Vec<Arc<Run>>>>,
    l0_compaction_trigger: usize,
    level_size_base_bytes: u64,
}

impl LeveledLsm {
    /// Opens the LSM over `data_dir`, loading every id the manifest
    /// reports live. Ids whose recorded level is missing fall back to
    /// directory search per [`resolve_sstable_path`].
    pub fn open(
        data_dir: impl Into<PathBuf>,
        manifest: Arc<Manifest>,
        l0_compaction_trigger: usize,
        level_size_base_bytes: u64,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let mut levels: Vec<Vec<Arc<Run>>> = Vec::new();
        let mut max_id = 0u32;
        for id in manifest.live_set() {
            let level_hint = manifest.level_of(id);
            let path = resolve_sstable_path(&data_dir, id, level_hint)
                .ok_or_else(|| CompactionError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("sstable {id} listed live in manifest but missing on disk"),
                )))?;
            let level = level_hint.unwrap_or_else(|| level_from_path(&path));
            let reader = Arc::new(SstableReader::open(&path)?);
            while levels.len() <= level as usize {
                levels.push(Vec::new());
            }
            levels[level as usize].push(Arc::new(Run { id, level, reader }));
            max_id = max_id.max(id);
        }
        // L0 is newest-first; id order is a reasonable proxy for
        // recency since ids are handed out monotonically.
        if !levels.is_empty() {
            levels[0].sort_by(|a, b| b.id.cmp(&a.id));
        }
        for level in levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.reader.min_key().cmp(&b.reader.min_key()));
        }
        if levels.is_empty() {
            levels.push(Vec::new());
        }

        Ok(LeveledLsm {
            data_dir,
            manifest,
            next_id: AtomicU32::new(max_id + 1),
            levels: RwLock::new(levels),
            l0_compaction_trigger,
            level_size_base_bytes,
        })
    }

    fn level_dir(&self, level: u32) -> PathBuf {
        self.data_dir.join(format!("level_{level}"))
    }

    fn max_bytes(&self, level: u32) -> u64 {
        debug_assert!(level >= 1);
        self.level_size_base_bytes * 10u64.pow(level - 1)
    }

    /// Flushes a MemTable snapshot as a new L0 SSTable. Returns the
    /// new id; the caller is responsible for updating the manifest
    /// (kept as a separate step so the engine can order WAL
    /// truncation and manifest update consistently).
    pub fn flush_memtable(&self, entries: Vec<(Vec<u8>, MemTableEntry)>) -> Result<SstId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let dir = self.level_dir(0);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{id}.sst"));

        let mut writer = SstableWriter::new();
        for (k, v) in entries {
            writer.add(k, v);
        }
        writer.finish(&path)?;
        self.manifest.add_sstable(id, 0)?;

        let reader = Arc::new(SstableReader::open(&path)?);
        let mut levels = self.levels.write().expect("lsm lock poisoned");
        levels[0].insert(0, Arc::new(Run { id, level: 0, reader }));
        info!(id, "memtable flushed to L0");
        Ok(id)
    }

    /// Lookup in source-recency order: L0 newest to oldest, then
    /// L1..Ln in stored (key-sorted) order. Stops and returns at the
    /// first hit, including a tombstone.
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        let levels = self.levels.read().expect("lsm lock poisoned");
        for level in levels.iter() {
            for run in level {
                if let Some(entry) = run.reader.get(key) {
                    return Some(entry);
                }
            }
        }
        None
    }

    /// All live runs in lookup order, for the scan path's merge.
    fn all_runs_in_order(&self) -> Vec<Arc<Run>> {
        let levels = self.levels.read().expect("lsm lock poisoned");
        levels.iter().flatten().cloned().collect()
    }

    /// Merged range scan over every live SSTable (the caller merges
    /// in MemTable entries separately, since the MemTable is not part
    /// of this module). Tombstones are included in the output so the
    /// caller can fold them against MemTable / other runs before
    /// filtering for the final result.
    pub fn scan_runs(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<(Vec<u8>, MemTableEntry, usize)> {
        let runs = self.all_runs_in_order();
        let sources: Vec<Box<dyn Iterator<Item = (Vec<u8>, MemTableEntry)>>> = runs
            .iter()
            .filter(|r| r.reader.overlaps(start, end))
            .map(|r| {
                let reader = r.reader.clone();
                let start = start.map(|s| s.to_vec());
                let end = end.map(|e| e.to_vec());
                let iter = reader.iter_all().filter(move |(k, _)| {
                    start.as_deref().map(|s| k.as_slice() >= s).unwrap_or(true)
                        && end.as_deref().map(|e| k.as_slice() < e).unwrap_or(true)
                });
                Box::new(iter) as Box<dyn Iterator<Item = (Vec<u8>, MemTableEntry)>>
            })
            .collect();
        merge_by_key_priority(sources)
    }

    /// Checks compaction triggers and performs at most one compaction
    /// step. The engine calls this after every flush; returning
    /// `None` means nothing needed to happen.
    pub fn maybe_compact(&self) -> Result<Option<CompactionResult>> {
        let l0_len = self.levels.read().expect("lsm lock poisoned")[0].len();
        if l0_len >= self.l0_compaction_trigger {
            return self.compact_l0_to_l1().map(Some);
        }

        let level_count = self.levels.read().expect("lsm lock poisoned").len();
        for level in 1..level_count {
            let total: u64 = {
                let levels = self.levels.read().expect("lsm lock poisoned");
                levels[level]
                    .iter()
                    .map(|r| r.byte_size(&self.data_dir))
                    .sum()
            };
            if total > self.max_bytes(level as u32) {
                return self.compact_one(level as u32).map(Some);
            }
        }
        Ok(None)
    }

    fn is_deepest_level(&self, level: u32) -> bool {
        let levels = self.levels.read().expect("lsm lock poisoned");
        level as usize == levels.len() - 1
    }

    fn compact_l0_to_l1(&self) -> Result<CompactionResult> {
        let (l0_runs, l1_runs) = {
            let levels = self.levels.read().expect("lsm lock poisoned");
            (levels[0].clone(), levels.get(1).cloned().unwrap_or_default())
        };

        // L0 runs overlap the whole key space in the general case, so
        // every existing L1 run is a merge input.
        let mut inputs: Vec<Arc<Run>> = l0_runs.clone();
        inputs.extend(l1_runs.iter().cloned());

        let drop_tombstones =
            self.is_deepest_level(1) || self.levels.read().expect("lsm lock poisoned").len() <= 2;
        let merged = self.merge_runs(&inputs, drop_tombstones);

        let mut result = CompactionResult::default();
        let new_id = self.write_level(1, &merged)?;
        if let Some(id) = new_id {
            result.added.push(id);
        }
        for run in &inputs {
            result.removed.push(run.id);
        }

        self.manifest.remove_sstables(&result.removed)?;
        self.replace_level_contents(0, Vec::new());
        self.replace_level_contents(
            1,
            new_id
                .map(|id| vec![self.load_run(id, 1).expect("just-written run must open")])
                .unwrap_or_default(),
        );
        self.delete_run_files(&inputs)?;
        info!(added = ?result.added, removed = ?result.removed, "compacted L0 into L1");
        Ok(result)
    }

    fn compact_one(&self, level: u32) -> Result<CompactionResult> {
        let (victim, next_level_runs) = {
            let levels = self.levels.read().expect("lsm lock poisoned");
            let level_runs = &levels[level as usize];
            // Policy: lowest-key oldest file. Runs at level >= 1 are
            // stored sorted by min key and id order reflects age.
            let victim = level_runs
                .iter()
                .min_by(|a, b| a.reader.min_key().cmp(&b.reader.min_key()).then(a.id.cmp(&b.id)))
                .cloned();
            let next = levels.get(level as usize + 1).cloned().unwrap_or_default();
            (victim, next)
        };

        let Some(victim) = victim else {
            return Ok(CompactionResult::default());
        };

        let overlapping: Vec<Arc<Run>> = next_level_runs
            .iter()
            .filter(|r| r.reader.overlaps(victim.reader.min_key(), victim.reader.max_key().map(bump)
                .as_deref()))
            .cloned()
            .collect();

        let mut inputs = vec![victim.clone()];
        inputs.extend(overlapping.iter().cloned());

        let drop_tombstones = self.is_deepest_level(level + 1);
        let merged = self.merge_runs(&inputs, drop_tombstones);

        let next_level = level + 1;
        let new_id = self.write_level(next_level, &merged)?;

        let mut result = CompactionResult::default();
        if let Some(id) = new_id {
            result.added.push(id);
        }
        for run in &inputs {
            result.removed.push(run.id);
        }
        self.manifest.remove_sstables(&result.removed)?;

        {
            let mut levels = self.levels.write().expect("lsm lock poisoned");
            levels[level as usize].retain(|r| r.id != victim.id);
            while levels.len() <= next_level as usize {
                levels.push(Vec::new());
            }
            levels[next_level as usize].retain(|r| !overlapping.iter().any(|o| o.id == r.id));
            if let Some(id) = new_id {
                let run = self.load_run(id, next_level)?;
                levels[next_level as usize].push(run);
                levels[next_level as usize]
                    .sort_by(|a, b| a.reader.min_key().cmp(&b.reader.min_key()));
            }
        }
        self.delete_run_files(&inputs)?;
        info!(level, added = ?result.added, removed = ?result.removed, "compacted level");
        Ok(result)
    }

    fn replace_level_contents(&self, level: usize, runs: Vec<Arc<Run>>) {
        let mut levels = self.levels.write().expect("lsm lock poisoned");
        while levels.len() <= level {
            levels.push(Vec::new());
        }
        levels[level] = runs;
    }

    fn load_run(&self, id: SstId, level: u32) -> Result<Arc<Run>> {
        let path = self.level_dir(level).join(format!("{id}.sst"));
        let reader = Arc::new(SstableReader::open(&path)?);
        Ok(Arc::new(Run { id, level, reader }))
    }

    fn merge_runs(&self, inputs: &[Arc<Run>], drop_tombstones: bool) -> Vec<(Vec<u8>, MemTableEntry)> {
        let sources: Vec<Box<dyn Iterator<Item = (Vec<u8>, MemTableEntry)>>> = inputs
            .iter()
            .map(|r| {
                let reader = r.reader.clone();
                Box::new(reader.iter_all()) as Box<dyn Iterator<Item = (Vec<u8>, MemTableEntry)>>
            })
            .collect();
        // Input order already encodes recency: `inputs` is built
        // newest-source-first by every caller above.
        let merged = merge_by_key_priority(sources);
        merged
            .into_iter()
            .filter(|(_, entry, _)| !(drop_tombstones && entry.is_tombstone()))
            .map(|(k, v, _)| (k, v))
            .collect()
    }

    /// Writes `entries` as one new SSTable at `level`. Returns `None`
    /// if there was nothing to write (every input tombstone got
    /// dropped at the deepest level).
    fn write_level(&self, level: u32, entries: &[(Vec<u8>, MemTableEntry)]) -> Result<Option<SstId>> {
        if entries.is_empty() {
            return Ok(None);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let dir = self.level_dir(level);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{id}.sst"));
        let mut writer = SstableWriter::new();
        for (k, v) in entries {
            writer.add(k.clone(), v.clone());
        }
        writer.finish(&path)?;
        self.manifest.add_sstable(id, level)?;
        Ok(Some(id))
    }

    fn delete_run_files(&self, runs: &[Arc<Run>]) -> Result<()> {
        for run in runs {
            let path = run.path(&self.data_dir);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    pub fn live_sstable_count(&self) -> usize {
        self.levels.read().expect("lsm lock poisoned").iter().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub fn level_len(&self, level: usize) -> usize {
        self.levels
            .read()
            .expect("lsm lock poisoned")
            .get(level)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn level_from_path(path: &Path) -> u32 {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("level_"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Smallest byte string strictly greater than `key` under
/// lexicographic order on the same length plus one extra zero byte;
/// used only to build an exclusive upper bound for overlap checks.
fn bump(key: &[u8]) -> Vec<u8> {
    let mut v = key.to_vec();
    v.push(0);
    v
}

struct HeapEntry {
    key: Vec<u8>,
    entry: MemTableEntry,
    source_idx: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source_idx == other.source_idx
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Min-heap on (key ASC, source_idx ASC i.e. newest source
        // first): reverse so the smallest key / newest source pops.
        other
            .key
            .cmp(&self.key)
            .then(other.source_idx.cmp(&self.source_idx))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Heap-based k-way merge. `sources[0]` is the newest; on a key tie
/// across sources the lowest index wins and the rest are drained past
/// that key. Returns `(key, entry, winning_source_idx)` in ascending
/// key order.
fn merge_by_key_priority(
    mut sources: Vec<Box<dyn Iterator<Item = (Vec<u8>, MemTableEntry)>>>,
) -> Vec<(Vec<u8>, MemTableEntry, usize)> {
    let mut heap = BinaryHeap::new();
    for (idx, source) in sources.iter_mut().enumerate() {
        if let Some((key, entry)) = source.next() {
            heap.push(HeapEntry {
                key,
                entry,
                source_idx: idx,
            });
        }
    }

    let mut out = Vec::new();
    while let Some(top) = heap.pop() {
        let winning_key = top.key.clone();
        // Pull the next item from the winner's source so it stays in the heap.
        if let Some((key, entry)) = sources[top.source_idx].next() {
            heap.push(HeapEntry {
                key,
                entry,
                source_idx: top.source_idx,
            });
        }
        // Drain and discard any other sources sitting on the same key
        // (they are shadowed by the newer source that just won).
        let mut still_tied = Vec::new();
        while let Some(next) = heap.peek() {
            if next.key == winning_key {
                let shadowed = heap.pop().unwrap();
                if let Some((key, entry)) = sources[shadowed.source_idx].next() {
                    still_tied.push(HeapEntry {
                        key,
                        entry,
                        source_idx: shadowed.source_idx,
                    });
                }
            } else {
                break;
            }
        }
        for item in still_tied {
            heap.push(item);
        }
        out.push((winning_key, top.entry, top.source_idx));
    }
    out
}
