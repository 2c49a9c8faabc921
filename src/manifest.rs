//! Append-only log of SSTable lifecycle events, replayed on open to
//! derive the live set.
//!
//! Plain text, one record per line:
//! `ADD <id> <level>\n` (current form), `ADD <id>\n` (legacy, level
//! derived by directory search at load time), `REMOVE <id>\n`.
//! Flushed to disk after every mutation; durability here is a fsync
//! per append, matching the teacher's append-log discipline rather
//! than a buffered writer.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

pub type SstId = u32;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

struct Inner {
    file: File,
    /// Current live ids, mapped to their level (`None` for a legacy
    /// record whose level wasn't recorded at ADD time).
    live: BTreeMap<SstId, Option<u32>>,
}

pub struct Manifest {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl Manifest {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let live = Self::replay(&path)?;
        debug!(path = %path.display(), live_count = live.len(), "manifest opened");
        Ok(Manifest {
            path,
            inner: Mutex::new(Inner { file, live }),
        })
    }

    fn replay(path: &Path) -> Result<BTreeMap<SstId, Option<u32>>> {
        let file = File::open(path)?;
        let mut live = BTreeMap::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let command = parts.next().unwrap_or("");
            match command {
                "ADD" => {
                    let id: SstId = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ManifestError::Corruption(format!("bad ADD line: {line}")))?;
                    let level = parts.next().and_then(|s| s.parse::<u32>().ok());
                    live.insert(id, level);
                }
                "REMOVE" => {
                    let id: SstId = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| {
                        ManifestError::Corruption(format!("bad REMOVE line: {line}"))
                    })?;
                    live.remove(&id);
                }
                other => {
                    return Err(ManifestError::Corruption(format!(
                        "unknown manifest command: {other}"
                    )));
                }
            }
        }
        Ok(live)
    }

    /// Appends `ADD <id> <level>` and flushes before returning.
    pub fn add_sstable(&self, id: SstId, level: u32) -> Result<()> {
        let mut inner = self.inner.lock().expect("manifest mutex poisoned");
        writeln!(inner.file, "ADD {id} {level}")?;
        inner.file.sync_all()?;
        inner.live.insert(id, Some(level));
        Ok(())
    }

    /// Appends one `REMOVE <id>` line per id and flushes once at the end.
    pub fn remove_sstables(&self, ids: &[SstId]) -> Result<()> {
        let mut inner = self.inner.lock().expect("manifest mutex poisoned");
        for id in ids {
            writeln!(inner.file, "REMOVE {id}")?;
            inner.live.remove(id);
        }
        inner.file.sync_all()?;
        Ok(())
    }

    /// Current live set, sorted ascending by id.
    pub fn live_set(&self) -> BTreeSet<SstId> {
        let inner = self.inner.lock().expect("manifest mutex poisoned");
        inner.live.keys().copied().collect()
    }

    /// Level recorded for `id`, if the ADD record that created it
    /// carried one. `None` means the caller must fall back to
    /// searching level subdirectories, then the legacy flat location.
    pub fn level_of(&self, id: SstId) -> Option<u32> {
        let inner = self.inner.lock().expect("manifest mutex poisoned");
        inner.live.get(&id).copied().flatten()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Locates an SSTable file on disk for `id`, using the manifest's
/// recorded level when present and otherwise searching `level_0/`,
/// `level_1/`, ... then the flat legacy location directly under
/// `data_dir`.
pub fn resolve_sstable_path(data_dir: &Path, id: SstId, level_hint: Option<u32>) -> Option<PathBuf> {
    if let Some(level) = level_hint {
        let candidate = data_dir.join(format!("level_{level}")).join(format!("{id}.sst"));
        if candidate.exists() {
            return Some(candidate);
        }
        warn!(id, level, "manifest level hint missing file, falling back to search");
    }
    for level in 0..16u32 {
        let candidate = data_dir.join(format!("level_{level}")).join(format!("{id}.sst"));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    let legacy = data_dir.join(format!("{id}.sst"));
    if legacy.exists() {
        return Some(legacy);
    }
    None
}
