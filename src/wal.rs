//! The LSM-side write-ahead log: the authoritative durability log for
//! the LSM data path (MemTable, SSTable, compaction).
//!
//! The source this specification was distilled from also keeps a
//! separate ARIES-style log ([`crate::log_manager`]) for page-level
//! mutations. This crate treats the two as independent facilities:
//! the LSM path never consults the LogManager, and vice versa.
//!
//! Wire format per record, exactly as mandated:
//! `u8 type || u32 key_len || u32 value_len || key_bytes || value_bytes`.
//! Type 1 = Put, Type 2 = Delete (`value_len` is always 0 for Delete).
//! Each length field is capped at [`MAX_FIELD_LEN`] (64 MiB) as a sanity
//! bound against corrupted or adversarial input.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{trace, warn};

use crate::config::WalSyncMode;

/// Sanity cap on key/value length fields: 64 MiB.
pub const MAX_FIELD_LEN: u32 = 64 * 1024 * 1024;

const TYPE_PUT: u8 = 1;
const TYPE_DELETE: u8 = 2;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, WalError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WalRecord {
    pub fn key(&self) -> &[u8] {
        match self {
            WalRecord::Put { key, .. } => key,
            WalRecord::Delete { key } => key,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let (type_byte, key, value): (u8, &[u8], &[u8]) = match self {
            WalRecord::Put { key, value } => (TYPE_PUT, key, value),
            WalRecord::Delete { key } => (TYPE_DELETE, key, &[]),
        };
        let mut buf = Vec::with_capacity(1 + 4 + 4 + key.len() + value.len());
        buf.push(type_byte);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 9 {
            return Err(WalError::Corruption("record shorter than header".into()));
        }
        let type_byte = buf[0];
        let key_len = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        let value_len = u32::from_le_bytes(buf[5..9].try_into().unwrap());
        if key_len > MAX_FIELD_LEN || value_len > MAX_FIELD_LEN {
            return Err(WalError::Corruption(format!(
                "field length exceeds sanity cap: key_len={key_len}, value_len={value_len}"
            )));
        }
        let key_len = key_len as usize;
        let value_len = value_len as usize;
        if buf.len() != 9 + key_len + value_len {
            return Err(WalError::Corruption(
                "record length does not match declared field lengths".into(),
            ));
        }
        let key = buf[9..9 + key_len].to_vec();
        let value = buf[9 + key_len..9 + key_len + value_len].to_vec();
        match type_byte {
            TYPE_PUT => Ok(WalRecord::Put { key, value }),
            TYPE_DELETE => Ok(WalRecord::Delete { key }),
            other => Err(WalError::Corruption(format!("unknown record type {other}"))),
        }
    }
}

fn compute_crc(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Append-only log of [`WalRecord`]s, framed as
/// `[u32 len][record bytes][u32 crc32]`.
pub struct Wal {
    file: Mutex<File>,
    sync_mode: WalSyncMode,
}

impl Wal {
    pub fn open(path: impl AsRef<Path>, sync_mode: WalSyncMode) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Ok(Wal {
            file: Mutex::new(file),
            sync_mode,
        })
    }

    fn append_record(&self, record: &WalRecord, force_sync: bool) -> Result<()> {
        let payload = record.encode();
        let crc = compute_crc(&payload);
        let mut file = self.file.lock().expect("wal mutex poisoned");
        file.seek(SeekFrom::End(0))?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(&payload)?;
        file.write_all(&crc.to_le_bytes())?;
        if force_sync && self.sync_mode == WalSyncMode::EveryWrite {
            file.sync_all()?;
        }
        trace!(key_len = record.key().len(), "wal record appended");
        Ok(())
    }

    /// Appends a Put record. Under `EveryWrite` sync mode this is
    /// durable on return, satisfying the write-ahead rule before the
    /// caller mutates the MemTable.
    pub fn append_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.append_record(
            &WalRecord::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            },
            true,
        )
    }

    pub fn append_delete(&self, key: &[u8]) -> Result<()> {
        self.append_record(&WalRecord::Delete { key: key.to_vec() }, true)
    }

    /// Same as [`Wal::append_put`] but defers the per-record sync.
    /// Used while a batch is open; the caller is responsible for
    /// calling [`Wal::flush`] once the batch closes.
    pub fn append_put_deferred(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.append_record(
            &WalRecord::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            },
            false,
        )
    }

    pub fn append_delete_deferred(&self, key: &[u8]) -> Result<()> {
        self.append_record(&WalRecord::Delete { key: key.to_vec() }, false)
    }

    /// Forces durability regardless of `sync_mode` — used to end a
    /// batch (`EndBatch`) or an explicit `Flush`.
    pub fn flush(&self) -> Result<()> {
        let file = self.file.lock().expect("wal mutex poisoned");
        file.sync_all()?;
        Ok(())
    }

    /// Replays records in append order. A truncated trailing record
    /// (the common shape of a crash mid-append) is treated as the
    /// clean end of the log, not corruption, since the write-ahead
    /// rule guarantees no MemTable mutation ever depended on it; any
    /// other structural problem (bad type byte, length over the
    /// sanity cap, checksum mismatch) is reported as corruption.
    pub fn replay(&self, mut callback: impl FnMut(WalRecord)) -> Result<()> {
        let mut reader = {
            let mut file = self.file.lock().expect("wal mutex poisoned");
            file.seek(SeekFrom::Start(0))?;
            file.try_clone()?
        };

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(WalError::Io(e)),
            }
            let len = u32::from_le_bytes(len_buf);
            if len > MAX_FIELD_LEN * 2 + 9 {
                return Err(WalError::Corruption(format!(
                    "record length {len} exceeds sanity bound"
                )));
            }
            let mut payload = vec![0u8; len as usize];
            if reader.read_exact(&mut payload).is_err() {
                warn!("truncated wal record payload, treating as clean end of log");
                break;
            }
            let mut crc_buf = [0u8; 4];
            if reader.read_exact(&mut crc_buf).is_err() {
                warn!("truncated wal record crc, treating as clean end of log");
                break;
            }
            let stored_crc = u32::from_le_bytes(crc_buf);
            if compute_crc(&payload) != stored_crc {
                return Err(WalError::Corruption("checksum mismatch".into()));
            }
            let record = WalRecord::decode(&payload)?;
            callback(record);
        }
        Ok(())
    }
}
