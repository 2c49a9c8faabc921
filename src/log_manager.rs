//! ARIES-style write-ahead log over page-level mutations.
//!
//! This is the page/buffer-pool path's log, independent from the
//! LSM-side WAL in [`crate::wal`]. Recovery for the LSM path does not
//! consult this log; see [`crate::wal`] for that authority.
//!
//! Record framing follows the crate's length-prefixed, CRC-suffixed
//! convention: `[u32 len][record bytes][u32 crc32]`, with the record
//! bytes produced by this module's own [`Encode`]/[`Decode`] impls
//! rather than the general `encoding` module, since field order here
//! is itself part of the recovery contract (Update must precede
//! Commit in the physical log, and readers walk fields in a fixed
//! order).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crc32fast::Hasher;
use thiserror::Error;
use tracing::{debug, warn};

use crate::encoding::{Decode, Encode, EncodingError};

pub const INVALID_LSN: u64 = 0;

#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("checksum mismatch on log record")]
    ChecksumMismatch,

    #[error("corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, LogManagerError>;

#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Begin {
        lsn: u64,
        txn_id: u64,
    },
    Update {
        lsn: u64,
        txn_id: u64,
        prev_lsn: u64,
        page_id: u32,
        offset: u32,
        pre_image: Vec<u8>,
        post_image: Vec<u8>,
    },
    Commit {
        lsn: u64,
        txn_id: u64,
        prev_lsn: u64,
    },
    Abort {
        lsn: u64,
        txn_id: u64,
        prev_lsn: u64,
    },
    /// Compensation log record, written while undoing an aborted
    /// transaction so the undo itself is never redone twice.
    Clr {
        lsn: u64,
        txn_id: u64,
        page_id: u32,
        offset: u32,
        post_image: Vec<u8>,
        undo_next_lsn: u64,
    },
}

impl LogRecord {
    pub fn lsn(&self) -> u64 {
        match self {
            LogRecord::Begin { lsn, .. }
            | LogRecord::Update { lsn, .. }
            | LogRecord::Commit { lsn, .. }
            | LogRecord::Abort { lsn, .. }
            | LogRecord::Clr { lsn, .. } => *lsn,
        }
    }

    pub fn txn_id(&self) -> u64 {
        match self {
            LogRecord::Begin { txn_id, .. }
            | LogRecord::Update { txn_id, .. }
            | LogRecord::Commit { txn_id, .. }
            | LogRecord::Abort { txn_id, .. }
            | LogRecord::Clr { txn_id, .. } => *txn_id,
        }
    }

    fn type_tag(&self) -> u8 {
        match self {
            LogRecord::Begin { .. } => 0,
            LogRecord::Update { .. } => 1,
            LogRecord::Commit { .. } => 2,
            LogRecord::Abort { .. } => 3,
            LogRecord::Clr { .. } => 4,
        }
    }
}

impl Encode for LogRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.type_tag().encode_to(buf)?;
        match self {
            LogRecord::Begin { lsn, txn_id } => {
                lsn.encode_to(buf)?;
                txn_id.encode_to(buf)?;
            }
            LogRecord::Update {
                lsn,
                txn_id,
                prev_lsn,
                page_id,
                offset,
                pre_image,
                post_image,
            } => {
                lsn.encode_to(buf)?;
                txn_id.encode_to(buf)?;
                prev_lsn.encode_to(buf)?;
                page_id.encode_to(buf)?;
                offset.encode_to(buf)?;
                pre_image.encode_to(buf)?;
                post_image.encode_to(buf)?;
            }
            LogRecord::Commit {
                lsn,
                txn_id,
                prev_lsn,
            }
            | LogRecord::Abort {
                lsn,
                txn_id,
                prev_lsn,
            } => {
                lsn.encode_to(buf)?;
                txn_id.encode_to(buf)?;
                prev_lsn.encode_to(buf)?;
            }
            LogRecord::Clr {
                lsn,
                txn_id,
                page_id,
                offset,
                post_image,
                undo_next_lsn,
            } => {
                lsn.encode_to(buf)?;
                txn_id.encode_to(buf)?;
                page_id.encode_to(buf)?;
                offset.encode_to(buf)?;
                post_image.encode_to(buf)?;
                undo_next_lsn.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for LogRecord {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let (tag, mut c) = u8::decode_from(buf)?;
        macro_rules! next {
            ($t:ty) => {{
                let (v, n) = <$t>::decode_from(&buf[c..])?;
                c += n;
                v
            }};
        }
        let record = match tag {
            0 => LogRecord::Begin {
                lsn: next!(u64),
                txn_id: next!(u64),
            },
            1 => LogRecord::Update {
                lsn: next!(u64),
                txn_id: next!(u64),
                prev_lsn: next!(u64),
                page_id: next!(u32),
                offset: next!(u32),
                pre_image: next!(Vec<u8>),
                post_image: next!(Vec<u8>),
            },
            2 => LogRecord::Commit {
                lsn: next!(u64),
                txn_id: next!(u64),
                prev_lsn: next!(u64),
            },
            3 => LogRecord::Abort {
                lsn: next!(u64),
                txn_id: next!(u64),
                prev_lsn: next!(u64),
            },
            4 => LogRecord::Clr {
                lsn: next!(u64),
                txn_id: next!(u64),
                page_id: next!(u32),
                offset: next!(u32),
                post_image: next!(Vec<u8>),
                undo_next_lsn: next!(u64),
            },
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "LogRecord",
                })
            }
        };
        Ok((record, c))
    }
}

fn compute_crc(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Append-only ARIES-style log: monotonic LSNs, Begin/Update/Commit/
/// Abort/CLR records, and a write-ahead `ForceFlush` boundary.
pub struct LogManager {
    file: Mutex<File>,
    next_lsn: AtomicU64,
}

impl LogManager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut max_lsn = INVALID_LSN;
        file.seek(SeekFrom::Start(0))?;
        for record in RecordReader::new(file.try_clone()?) {
            let record = record?;
            max_lsn = max_lsn.max(record.lsn());
        }
        file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), max_lsn, "log manager opened");
        Ok(LogManager {
            file: Mutex::new(file),
            next_lsn: AtomicU64::new(max_lsn + 1),
        })
    }

    fn next_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    fn append(&self, record: LogRecord) -> Result<u64> {
        let lsn = record.lsn();
        let mut payload = Vec::new();
        record.encode_to(&mut payload)?;
        let crc = compute_crc(&payload);

        let mut file = self.file.lock().expect("log manager mutex poisoned");
        file.seek(SeekFrom::End(0))?;
        let len = payload.len() as u32;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&payload)?;
        file.write_all(&crc.to_le_bytes())?;
        Ok(lsn)
    }

    pub fn append_begin(&self, txn_id: u64) -> Result<u64> {
        let lsn = self.next_lsn();
        self.append(LogRecord::Begin { lsn, txn_id })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append_update(
        &self,
        txn_id: u64,
        prev_lsn: u64,
        page_id: u32,
        offset: u32,
        pre_image: Vec<u8>,
        post_image: Vec<u8>,
    ) -> Result<u64> {
        let lsn = self.next_lsn();
        self.append(LogRecord::Update {
            lsn,
            txn_id,
            prev_lsn,
            page_id,
            offset,
            pre_image,
            post_image,
        })
    }

    pub fn append_commit(&self, txn_id: u64, prev_lsn: u64) -> Result<u64> {
        let lsn = self.next_lsn();
        self.append(LogRecord::Commit {
            lsn,
            txn_id,
            prev_lsn,
        })
    }

    pub fn append_abort(&self, txn_id: u64, prev_lsn: u64) -> Result<u64> {
        let lsn = self.next_lsn();
        self.append(LogRecord::Abort {
            lsn,
            txn_id,
            prev_lsn,
        })
    }

    pub fn append_clr(
        &self,
        txn_id: u64,
        page_id: u32,
        offset: u32,
        post_image: Vec<u8>,
        undo_next_lsn: u64,
    ) -> Result<u64> {
        let lsn = self.next_lsn();
        self.append(LogRecord::Clr {
            lsn,
            txn_id,
            page_id,
            offset,
            post_image,
            undo_next_lsn,
        })
    }

    /// Forces all records up to (and including) `up_to_lsn` durable.
    /// `None` flushes everything appended so far. Commit records are
    /// not considered committed until this returns successfully for
    /// their LSN.
    pub fn force_flush(&self, _up_to_lsn: Option<u64>) -> Result<()> {
        let file = self.file.lock().expect("log manager mutex poisoned");
        file.sync_all()?;
        Ok(())
    }

    /// Replays all records in LSN order (append order, since LSNs are
    /// issued monotonically as records are appended).
    pub fn iterate(&self) -> Result<Vec<LogRecord>> {
        let file = self.file.lock().expect("log manager mutex poisoned");
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        RecordReader::new(file).collect()
    }
}

struct RecordReader {
    file: File,
    eof: bool,
}

impl RecordReader {
    fn new(file: File) -> Self {
        RecordReader { file, eof: false }
    }
}

impl Iterator for RecordReader {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof {
            return None;
        }
        let mut len_buf = [0u8; 4];
        match self.file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.eof = true;
                return None;
            }
            Err(e) => return Some(Err(LogManagerError::Io(e))),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        if let Err(e) = self.file.read_exact(&mut payload) {
            self.eof = true;
            warn!("truncated log manager record payload: {e}");
            return Some(Err(LogManagerError::Corruption(
                "truncated record payload".to_string(),
            )));
        }
        let mut crc_buf = [0u8; 4];
        if let Err(e) = self.file.read_exact(&mut crc_buf) {
            self.eof = true;
            warn!("truncated log manager record crc: {e}");
            return Some(Err(LogManagerError::Corruption(
                "truncated record crc".to_string(),
            )));
        }
        let stored_crc = u32::from_le_bytes(crc_buf);
        if compute_crc(&payload) != stored_crc {
            self.eof = true;
            return Some(Err(LogManagerError::ChecksumMismatch));
        }
        match LogRecord::decode_from(&payload) {
            Ok((record, _)) => Some(Ok(record)),
            Err(e) => {
                self.eof = true;
                Some(Err(LogManagerError::Encoding(e)))
            }
        }
    }
}
