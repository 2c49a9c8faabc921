//! Owns the database's page file: aligned read/write at `id * 4096`,
//! monotonic page allocation, and durable sync.
//!
//! Internally synchronized with a single `Mutex<File>`, mirroring the
//! teacher's `Arc<Mutex<File>>` WAL-handle idiom: a single coarse lock
//! over file operations is sufficient here, and finer-grained
//! discipline would only matter if profiling showed contention.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::page::{Page, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, DiskManagerError>;

/// A single-page read or write request for batched I/O.
pub struct PageRequest<'a> {
    pub page_id: u32,
    pub buf: &'a mut [u8; PAGE_SIZE],
}

pub struct DiskManager {
    path: PathBuf,
    file: Mutex<File>,
    /// Next page id to hand out. Page ids are never reused.
    next_page_id: AtomicU32,
    fixed_buffers_registered: std::sync::atomic::AtomicBool,
}

impl DiskManager {
    /// Opens or creates the page file at `path`. The file size must be
    /// a multiple of [`PAGE_SIZE`]; otherwise this is corruption. On
    /// first creation, page 0 (the invalid-sentinel page) is written
    /// as a zeroed reserved page so offset arithmetic stays uniform.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(DiskManagerError::Corruption(format!(
                "page file size {len} is not a multiple of {PAGE_SIZE}"
            )));
        }
        let page_count = (len / PAGE_SIZE as u64) as u32;

        let manager = DiskManager {
            path,
            file: Mutex::new(file.try_clone().map_err(DiskManagerError::Io)?),
            next_page_id: AtomicU32::new(page_count.max(1)),
            fixed_buffers_registered: std::sync::atomic::AtomicBool::new(false),
        };

        if !existed || page_count == 0 {
            let reserved = Page::new_zeroed();
            let buf = *reserved.as_bytes();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&buf)?;
            file.sync_all()?;
            manager
                .next_page_id
                .store(HEADER_PAGE_ID.max(1), Ordering::SeqCst);
        }

        debug!(path = %manager.path.display(), page_count, "disk manager opened");
        Ok(manager)
    }

    fn offset_of(page_id: u32) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }

    /// Reads the page at `id`. Verifies the checksum and, when the
    /// stored page id isn't the invalid sentinel, that it matches `id`.
    pub fn read_page(&self, id: u32) -> Result<Page> {
        let mut raw = [0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock().expect("disk manager mutex poisoned");
            file.seek(SeekFrom::Start(Self::offset_of(id)))?;
            file.read_exact(&mut raw)?;
        }
        let page = Page::from_bytes(raw);
        if !page.verify_checksum() {
            warn!(page_id = id, "checksum mismatch on read");
            return Err(DiskManagerError::Corruption(format!(
                "checksum mismatch on page {id}"
            )));
        }
        let stored_id = page.page_id();
        if stored_id != INVALID_PAGE_ID && stored_id != id {
            return Err(DiskManagerError::Corruption(format!(
                "page id mismatch: expected {id}, found {stored_id}"
            )));
        }
        trace!(page_id = id, "page read");
        Ok(page)
    }

    /// Writes `page` at `id`'s offset, refreshing the checksum first if
    /// the caller has not already done so.
    pub fn write_page(&self, id: u32, page: &mut Page) -> Result<()> {
        if page.page_id() != id {
            page.set_page_id(id);
        }
        page.update_checksum();
        let mut file = self.file.lock().expect("disk manager mutex poisoned");
        file.seek(SeekFrom::Start(Self::offset_of(id)))?;
        file.write_all(page.as_bytes())?;
        trace!(page_id = id, "page written");
        Ok(())
    }

    /// Atomically allocates and returns the next page id.
    pub fn allocate_page(&self) -> u32 {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn page_count(&self) -> u32 {
        self.next_page_id.load(Ordering::SeqCst)
    }

    /// Multi-page read into `bufs`, one page per slot, starting at `start_id`.
    pub fn read_contiguous(&self, start_id: u32, bufs: &mut [[u8; PAGE_SIZE]]) -> Result<()> {
        let mut file = self.file.lock().expect("disk manager mutex poisoned");
        file.seek(SeekFrom::Start(Self::offset_of(start_id)))?;
        for buf in bufs.iter_mut() {
            file.read_exact(buf)?;
        }
        Ok(())
    }

    /// Multi-page write starting at `start_id`. May extend the file by
    /// up to one page past the current logical end; it never leaves a
    /// gap between the previous end and the new content.
    pub fn write_contiguous(&self, start_id: u32, bufs: &[[u8; PAGE_SIZE]]) -> Result<()> {
        let mut file = self.file.lock().expect("disk manager mutex poisoned");
        file.seek(SeekFrom::Start(Self::offset_of(start_id)))?;
        for buf in bufs {
            file.write_all(buf)?;
        }
        Ok(())
    }

    /// Executes a batch of page reads. Falls back to sequential
    /// single-page I/O (no `io_uring`-style submission queue is in the
    /// dependency stack); the entire batch completes or the first
    /// error aborts it.
    pub fn batch_read(&self, requests: &mut [PageRequest<'_>]) -> Result<()> {
        debug!(count = requests.len(), "batch read falling back to sequential I/O");
        for req in requests.iter_mut() {
            let page = self.read_page(req.page_id)?;
            req.buf.copy_from_slice(page.as_bytes());
        }
        Ok(())
    }

    pub fn batch_write(&self, requests: &[(u32, Page)]) -> Result<()> {
        debug!(count = requests.len(), "batch write falling back to sequential I/O");
        for (id, page) in requests {
            let mut page = page.clone();
            self.write_page(*id, &mut page)?;
        }
        Ok(())
    }

    /// Pins a pool of 4 KB-aligned buffers for zero-copy submission.
    /// Rejects non-4096-aligned spans and a second registration; the
    /// registration itself is a no-op beyond that bookkeeping since
    /// this implementation has no fixed-buffer I/O backend to arm.
    pub fn register_fixed_buffers(&self, span: &[u8]) -> Result<()> {
        if span.as_ptr() as usize % PAGE_SIZE != 0 {
            return Err(DiskManagerError::InvalidArgument(
                "fixed buffer span is not 4 KB-aligned".to_string(),
            ));
        }
        if self
            .fixed_buffers_registered
            .swap(true, Ordering::SeqCst)
        {
            return Err(DiskManagerError::InvalidArgument(
                "fixed buffers already registered".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock().expect("disk manager mutex poisoned");
        file.sync_all()?;
        Ok(())
    }
}
