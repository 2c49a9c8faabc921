//! Fixed-capacity page cache with LRU-K eviction.
//!
//! A multi-reader/single-writer lock guards the page table, free list,
//! and per-frame bookkeeping (pin count, dirty flag, access history).
//! Page *content* lives behind its own per-frame `RwLock`, so a caller
//! holding a frame's content latch never needs to hold the pool lock:
//! the pool guarantees the frame stays resident from `fetch_page`
//! until the matching `unpin_page`, independent of content access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, trace};

use crate::disk_manager::DiskManager;
use crate::page::Page;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("no evictable frame available")]
    NoFramesAvailable,

    #[error("page {0} is pinned and cannot be deleted")]
    PagePinned(u32),

    #[error("disk error: {0}")]
    Disk(#[from] crate::disk_manager::DiskManagerError),
}

pub type Result<T> = std::result::Result<T, BufferPoolError>;

/// A handle to a resident, pinned frame's content. Cloning is cheap
/// (an `Arc` bump); callers acquire `.read()`/`.write()` on it to
/// touch page bytes, then call [`BufferPoolManager::unpin_page`] when done.
pub type PageHandle = Arc<RwLock<Page>>;

struct FrameMeta {
    content: PageHandle,
    page_id: Option<u32>,
    pin_count: u32,
    dirty: bool,
    /// Most recent accesses first, capped at `k` entries.
    history: Vec<u64>,
}

impl FrameMeta {
    fn empty() -> Self {
        FrameMeta {
            content: Arc::new(RwLock::new(Page::new_zeroed())),
            page_id: None,
            pin_count: 0,
            dirty: false,
            history: Vec::new(),
        }
    }

    fn record_access(&mut self, tick: u64, k: usize) {
        self.history.insert(0, tick);
        self.history.truncate(k);
    }

    /// Backward k-distance: the age of the k-th most recent access.
    /// Frames with fewer than `k` recorded accesses are "infinite"
    /// distance (always preferred as eviction victims), with ties
    /// broken by least-recent access.
    fn k_distance(&self, k: usize) -> (bool, u64) {
        if self.history.len() < k {
            let oldest = self.history.last().copied().unwrap_or(0);
            (true, u64::MAX - oldest)
        } else {
            (false, u64::MAX - self.history[k - 1])
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flushes: u64,
}

struct Inner {
    frames: Vec<FrameMeta>,
    page_table: HashMap<u32, usize>,
    free_list: Vec<usize>,
}

/// Fixed-capacity cache of [`Page`] frames over a [`DiskManager`], with
/// LRU-K eviction of unpinned frames.
pub struct BufferPoolManager {
    disk: Arc<DiskManager>,
    inner: RwLock<Inner>,
    k: usize,
    clock: AtomicU64,
    stats: Stats,
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    flushes: AtomicU64,
}

impl BufferPoolManager {
    pub fn new(disk: Arc<DiskManager>, capacity: usize, k: usize) -> Self {
        let mut frames = Vec::with_capacity(capacity);
        let mut free_list = Vec::with_capacity(capacity);
        for i in 0..capacity {
            frames.push(FrameMeta::empty());
            free_list.push(i);
        }
        BufferPoolManager {
            disk,
            inner: RwLock::new(Inner {
                frames,
                page_table: HashMap::new(),
                free_list,
            }),
            k: k.max(1),
            clock: AtomicU64::new(0),
            stats: Stats::default(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    /// Finds a frame to hold a new page: free list first, else the
    /// LRU-K victim among unpinned, resident frames.
    fn acquire_frame(&self, inner: &mut Inner) -> Result<usize> {
        if let Some(idx) = inner.free_list.pop() {
            return Ok(idx);
        }

        let victim = inner
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.pin_count == 0 && f.page_id.is_some())
            .max_by_key(|(_, f)| f.k_distance(self.k))
            .map(|(idx, _)| idx);

        let idx = victim.ok_or(BufferPoolError::NoFramesAvailable)?;

        if inner.frames[idx].dirty {
            let page_id = inner.frames[idx].page_id.expect("victim has a page id");
            let mut content = inner.frames[idx]
                .content
                .write()
                .expect("frame latch poisoned");
            self.disk.write_page(page_id, &mut content)?;
            drop(content);
            inner.frames[idx].dirty = false;
            self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(old_id) = inner.frames[idx].page_id.take() {
            inner.page_table.remove(&old_id);
        }
        inner.frames[idx].history.clear();
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        Ok(idx)
    }

    /// Fetches and pins the page at `id`, loading it from disk if not
    /// resident. Returns a handle to the frame's content; the caller
    /// must call [`Self::unpin_page`] exactly once per successful fetch.
    pub fn fetch_page(&self, id: u32) -> Result<PageHandle> {
        let tick = self.tick();
        let mut inner = self.inner.write().expect("buffer pool lock poisoned");

        if let Some(&idx) = inner.page_table.get(&id) {
            inner.frames[idx].pin_count += 1;
            inner.frames[idx].record_access(tick, self.k);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!(page_id = id, "buffer pool hit");
            return Ok(inner.frames[idx].content.clone());
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let idx = self.acquire_frame(&mut inner)?;
        let page = self.disk.read_page(id)?;

        {
            let mut content = inner.frames[idx]
                .content
                .write()
                .expect("frame latch poisoned");
            *content = page;
        }
        inner.frames[idx].page_id = Some(id);
        inner.frames[idx].pin_count = 1;
        inner.frames[idx].dirty = false;
        inner.frames[idx].record_access(tick, self.k);
        inner.page_table.insert(id, idx);
        trace!(page_id = id, "buffer pool miss, loaded from disk");
        Ok(inner.frames[idx].content.clone())
    }

    /// Decrements the pin count for `id` and ORs in `is_dirty`.
    pub fn unpin_page(&self, id: u32, is_dirty: bool) {
        let mut inner = self.inner.write().expect("buffer pool lock poisoned");
        if let Some(&idx) = inner.page_table.get(&id) {
            inner.frames[idx].pin_count = inner.frames[idx].pin_count.saturating_sub(1);
            if is_dirty {
                inner.frames[idx].dirty = true;
            }
        }
    }

    /// Allocates a new page via the disk manager, pins it, marks it
    /// dirty, and returns `(id, handle)`.
    pub fn new_page(&self) -> Result<(u32, PageHandle)> {
        let tick = self.tick();
        let id = self.disk.allocate_page();
        let mut inner = self.inner.write().expect("buffer pool lock poisoned");
        let idx = self.acquire_frame(&mut inner)?;

        let mut page = Page::new_zeroed();
        page.set_page_id(id);

        {
            let mut content = inner.frames[idx]
                .content
                .write()
                .expect("frame latch poisoned");
            *content = page;
        }
        inner.frames[idx].page_id = Some(id);
        inner.frames[idx].pin_count = 1;
        inner.frames[idx].dirty = true;
        inner.frames[idx].record_access(tick, self.k);
        inner.page_table.insert(id, idx);
        debug!(page_id = id, "new page allocated into buffer pool");
        Ok((id, inner.frames[idx].content.clone()))
    }

    pub fn flush_page(&self, id: u32) -> Result<()> {
        let mut inner = self.inner.write().expect("buffer pool lock poisoned");
        if let Some(&idx) = inner.page_table.get(&id) {
            if inner.frames[idx].dirty {
                let mut content = inner.frames[idx]
                    .content
                    .write()
                    .expect("frame latch poisoned");
                self.disk.write_page(id, &mut content)?;
                drop(content);
                inner.frames[idx].dirty = false;
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let mut inner = self.inner.write().expect("buffer pool lock poisoned");
        let ids: Vec<u32> = inner.page_table.keys().copied().collect();
        for id in ids {
            let idx = inner.page_table[&id];
            if inner.frames[idx].dirty {
                let mut content = inner.frames[idx]
                    .content
                    .write()
                    .expect("frame latch poisoned");
                self.disk.write_page(id, &mut content)?;
                drop(content);
                inner.frames[idx].dirty = false;
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Removes `id` from the page table and returns its frame to the
    /// free list. Fails if the page is still pinned.
    pub fn delete_page(&self, id: u32) -> Result<()> {
        let mut inner = self.inner.write().expect("buffer pool lock poisoned");
        if let Some(&idx) = inner.page_table.get(&id) {
            if inner.frames[idx].pin_count > 0 {
                return Err(BufferPoolError::PagePinned(id));
            }
            inner.page_table.remove(&id);
            inner.frames[idx] = FrameMeta::empty();
            inner.free_list.push(idx);
        }
        Ok(())
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            flushes: self.stats.flushes.load(Ordering::Relaxed),
        }
    }
}
