//! Immutable, sorted on-disk runs. Built in one shot by
//! [`SstableWriter`], read by binary search through [`SstableReader`].
//!
//! On-disk layout, little-endian throughout:
//! ```text
//! "SSTB"                       4
//! entry_count                  4
//! bloom_blob_size               4     (0 permitted for legacy form)
//! bloom_blob                   bloom_blob_size
//! repeated entry_count times:
//!   key_len                    4
//!   value_len                  4      (u32::MAX sentinel marks a tombstone)
//!   key_bytes
//!   value_bytes
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::bloom::BloomFilter;
use crate::memtable::MemTableEntry;

const MAGIC: &[u8; 4] = b"SSTB";
/// Sentinel value-length marking a tombstone entry on disk.
const TOMBSTONE_SENTINEL: u32 = u32::MAX;
/// Target false-positive rate for each SSTable's Bloom filter, close
/// to the ~10 bits/key, k=3 configuration this format is sized for.
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.05;

#[derive(Error, Debug)]
pub enum SstableError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, SstableError>;

/// Builds one SSTable file from a sorted stream of entries. Sorting
/// is the caller's responsibility (the MemTable already iterates in
/// key order); Finish is the only visibility boundary, matching the
/// "build in one shot" rule — there is no partial/interim file.
pub struct SstableWriter {
    entries: Vec<(Vec<u8>, MemTableEntry)>,
}

impl SstableWriter {
    pub fn new() -> Self {
        SstableWriter {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, key: Vec<u8>, entry: MemTableEntry) {
        self.entries.push((key, entry));
    }

    /// Writes the file at `path`. Entries must already be in
    /// ascending key order (callers feeding a `BTreeMap` iterator or
    /// a prior `SstableWriter` get this for free); this is not
    /// re-sorted here since merge producers maintain order
    /// themselves.
    pub fn finish(self, path: impl AsRef<Path>) -> Result<()> {
        let mut bloom = BloomFilter::new(self.entries.len().max(1), BLOOM_FALSE_POSITIVE_RATE);
        for (key, _) in &self.entries {
            bloom.add(key);
        }
        let bloom_blob = bloom.to_bytes();

        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(bloom_blob.len() as u32).to_le_bytes());
        buf.extend_from_slice(&bloom_blob);
        for (key, entry) in &self.entries {
            let value_len = match entry {
                MemTableEntry::Value(v) => v.len() as u32,
                MemTableEntry::Tombstone => TOMBSTONE_SENTINEL,
            };
            buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buf.extend_from_slice(&value_len.to_le_bytes());
            buf.extend_from_slice(key);
            if let MemTableEntry::Value(v) = entry {
                buf.extend_from_slice(v);
            }
        }

        let mut file = File::create(path.as_ref())?;
        file.write_all(&buf)?;
        file.sync_all()?;
        debug!(
            path = %path.as_ref().display(),
            entries = self.entries.len(),
            "sstable written"
        );
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for SstableWriter {
    fn default() -> Self {
        Self::new()
    }
}

struct ParsedEntry {
    key: Vec<u8>,
    /// `None` marks a tombstone.
    value: Option<Vec<u8>>,
}

/// Reads an immutable SSTable file, backed by a read-only mmap since
/// the file is never mutated after `Finish`.
pub struct SstableReader {
    #[allow(dead_code)]
    mmap: Arc<Mmap>,
    bloom: BloomFilter,
    entries: Vec<ParsedEntry>,
}

impl SstableReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };
        let buf: &[u8] = &mmap;

        if buf.len() < 12 || &buf[0..4] != MAGIC {
            return Err(SstableError::Corruption("bad magic".to_string()));
        }
        let entry_count = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
        let bloom_blob_size = u32::from_le_bytes(buf[8..12].try_into().unwrap()) as usize;
        let mut offset = 12;
        if buf.len() < offset + bloom_blob_size {
            return Err(SstableError::Corruption("truncated bloom blob".to_string()));
        }
        let bloom = if bloom_blob_size == 0 {
            BloomFilter::new(1, 0.5)
        } else {
            BloomFilter::from_bytes(&buf[offset..offset + bloom_blob_size])
                .ok_or_else(|| SstableError::Corruption("bad bloom blob".to_string()))?
        };
        offset += bloom_blob_size;

        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            if buf.len() < offset + 8 {
                return Err(SstableError::Corruption("truncated entry header".to_string()));
            }
            let key_len = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
            let value_len_raw = u32::from_le_bytes(buf[offset + 4..offset + 8].try_into().unwrap());
            offset += 8;
            if buf.len() < offset + key_len {
                return Err(SstableError::Corruption("truncated key".to_string()));
            }
            let key = buf[offset..offset + key_len].to_vec();
            offset += key_len;

            let value = if value_len_raw == TOMBSTONE_SENTINEL {
                None
            } else {
                let value_len = value_len_raw as usize;
                if buf.len() < offset + value_len {
                    return Err(SstableError::Corruption("truncated value".to_string()));
                }
                let v = buf[offset..offset + value_len].to_vec();
                offset += value_len;
                Some(v)
            };
            entries.push(ParsedEntry { key, value });
        }

        Ok(SstableReader {
            mmap: Arc::new(mmap),
            bloom,
            entries,
        })
    }

    /// Returns `Some(MemTableEntry)` on an exact key match (value or
    /// tombstone), `None` if the key is absent from this run.
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        if !self.bloom.may_contain(key) {
            return None;
        }
        let idx = self
            .entries
            .binary_search_by(|e| e.key.as_slice().cmp(key))
            .ok()?;
        Some(match &self.entries[idx].value {
            Some(v) => MemTableEntry::Value(v.clone()),
            None => MemTableEntry::Tombstone,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        self.entries.first().map(|e| e.key.as_slice())
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        self.entries.last().map(|e| e.key.as_slice())
    }

    /// Whether this run's key range overlaps `[start, end)` (`None`
    /// bounds are open-ended).
    pub fn overlaps(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        let (Some(min), Some(max)) = (self.min_key(), self.max_key()) else {
            return false;
        };
        let after_end = end.map(|e| min >= e).unwrap_or(false);
        let before_start = start.map(|s| max < s).unwrap_or(false);
        !after_end && !before_start
    }

    /// All entries in key order, for use by the compactor's merge
    /// iterator. Returns an owned, `'static` iterator (entries are
    /// cloned up front) so callers can hold it independently of the
    /// reader's own lifetime, e.g. behind an `Arc<SstableReader>`
    /// captured in a closure.
    pub fn iter_all(&self) -> std::vec::IntoIter<(Vec<u8>, MemTableEntry)> {
        self.entries
            .iter()
            .map(|e| {
                let value = match &e.value {
                    Some(v) => MemTableEntry::Value(v.clone()),
                    None => MemTableEntry::Tombstone,
                };
                (e.key.clone(), value)
            })
            .collect::<Vec<_>>()
            .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_sample(path: &Path, entries: &[(&[u8], MemTableEntry)]) {
        let mut writer = SstableWriter::new();
        for (k, v) in entries {
            writer.add(k.to_vec(), v.clone());
        }
        writer.finish(path).unwrap();
    }

    #[test]
    fn get_returns_value_for_present_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.sst");
        write_sample(
            &path,
            &[
                (b"a", MemTableEntry::Value(b"1".to_vec())),
                (b"b", MemTableEntry::Value(b"2".to_vec())),
            ],
        );
        let reader = SstableReader::open(&path).unwrap();
        assert_eq!(reader.get(b"a").unwrap().as_value(), Some(&b"1"[..]));
        assert_eq!(reader.get(b"b").unwrap().as_value(), Some(&b"2"[..]));
    }

    #[test]
    fn get_returns_none_for_absent_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.sst");
        write_sample(&path, &[(b"a", MemTableEntry::Value(b"1".to_vec()))]);
        let reader = SstableReader::open(&path).unwrap();
        assert!(reader.get(b"z").is_none());
    }

    #[test]
    fn tombstone_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.sst");
        write_sample(&path, &[(b"a", MemTableEntry::Tombstone)]);
        let reader = SstableReader::open(&path).unwrap();
        assert!(reader.get(b"a").unwrap().is_tombstone());
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.sst");
        std::fs::write(&path, b"NOPE12345678").unwrap();
        assert!(SstableReader::open(&path).is_err());
    }

    #[test]
    fn overlaps_detects_disjoint_ranges() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.sst");
        write_sample(
            &path,
            &[
                (b"m", MemTableEntry::Value(b"1".to_vec())),
                (b"n", MemTableEntry::Value(b"2".to_vec())),
            ],
        );
        let reader = SstableReader::open(&path).unwrap();
        assert!(reader.overlaps(Some(b"a"), Some(b"z")));
        assert!(!reader.overlaps(Some(b"x"), Some(b"z")));
    }
}
