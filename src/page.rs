//! Fixed 4 KB page: a 64-byte header plus a 4032-byte data region.
//!
//! The header layout is stable on disk. Unused header bytes are
//! reserved (zeroed) so the layout can grow without breaking the
//! overall 64-byte/4096-byte contract.

use crc32fast::Hasher;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_SIZE: usize = 64;
pub const PAGE_DATA_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Reserved page id meaning "no page" / "invalid".
pub const INVALID_PAGE_ID: u32 = 0;
/// The header/superblock page, allocated first.
pub const HEADER_PAGE_ID: u32 = 1;

const OFF_PAGE_ID: usize = 0;
const OFF_LSN: usize = 4;
const OFF_PIN_COUNT: usize = 12;
const OFF_CHECKSUM: usize = 16;
const OFF_DIRTY: usize = 20;
const OFF_PAGE_TYPE: usize = 21;
const OFF_FREE_SPACE_HINT: usize = 22;
// bytes [24, 64) are reserved padding.

/// Tag for the kind of content a page holds.
///
/// A tagged byte in the header, not a class hierarchy: the page type
/// is data, not a dispatch mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Invalid = 0,
    Header = 1,
    BTreeInternal = 2,
    BTreeLeaf = 3,
    Heap = 4,
    Overflow = 5,
    FreeSpace = 6,
    VectorHnsw = 7,
}

impl PageType {
    fn from_byte(b: u8) -> PageType {
        match b {
            1 => PageType::Header,
            2 => PageType::BTreeInternal,
            3 => PageType::BTreeLeaf,
            4 => PageType::Heap,
            5 => PageType::Overflow,
            6 => PageType::FreeSpace,
            7 => PageType::VectorHnsw,
            _ => PageType::Invalid,
        }
    }
}

/// A single 4 KB page: 64-byte header followed by a 4032-byte data region.
///
/// Stored as one contiguous, 4 KB-aligned buffer so it can be reused
/// directly for unbuffered I/O without a copy.
#[derive(Clone)]
pub struct Page {
    buf: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new_zeroed() -> Self {
        Page {
            buf: Box::new([0u8; PAGE_SIZE]),
        }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.buf
    }

    pub fn from_bytes(buf: [u8; PAGE_SIZE]) -> Self {
        Page { buf: Box::new(buf) }
    }

    pub fn page_id(&self) -> u32 {
        u32::from_le_bytes(self.buf[OFF_PAGE_ID..OFF_PAGE_ID + 4].try_into().unwrap())
    }

    pub fn set_page_id(&mut self, id: u32) {
        self.buf[OFF_PAGE_ID..OFF_PAGE_ID + 4].copy_from_slice(&id.to_le_bytes());
    }

    pub fn lsn(&self) -> u64 {
        u64::from_le_bytes(self.buf[OFF_LSN..OFF_LSN + 8].try_into().unwrap())
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        self.buf[OFF_LSN..OFF_LSN + 8].copy_from_slice(&lsn.to_le_bytes());
    }

    pub fn pin_count(&self) -> u32 {
        u32::from_le_bytes(
            self.buf[OFF_PIN_COUNT..OFF_PIN_COUNT + 4]
                .try_into()
                .unwrap(),
        )
    }

    fn set_pin_count(&mut self, count: u32) {
        self.buf[OFF_PIN_COUNT..OFF_PIN_COUNT + 4].copy_from_slice(&count.to_le_bytes());
    }

    pub fn pin(&mut self) {
        let next = self.pin_count().saturating_add(1);
        self.set_pin_count(next);
    }

    /// Saturates at 0; unpinning an already-unpinned page is a no-op
    /// rather than a panic, since the buffer pool's bookkeeping is the
    /// authority on correctness, not the page itself.
    pub fn unpin(&mut self) {
        let next = self.pin_count().saturating_sub(1);
        self.set_pin_count(next);
    }

    pub fn is_dirty(&self) -> bool {
        self.buf[OFF_DIRTY] != 0
    }

    pub fn mark_dirty(&mut self) {
        self.buf[OFF_DIRTY] = 1;
    }

    pub fn clear_dirty(&mut self) {
        self.buf[OFF_DIRTY] = 0;
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.buf[OFF_PAGE_TYPE])
    }

    pub fn set_page_type(&mut self, t: PageType) {
        self.buf[OFF_PAGE_TYPE] = t as u8;
    }

    pub fn free_space_hint(&self) -> u16 {
        u16::from_le_bytes(
            self.buf[OFF_FREE_SPACE_HINT..OFF_FREE_SPACE_HINT + 2]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_free_space_hint(&mut self, hint: u16) {
        self.buf[OFF_FREE_SPACE_HINT..OFF_FREE_SPACE_HINT + 2]
            .copy_from_slice(&hint.to_le_bytes());
    }

    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].try_into().unwrap())
    }

    fn set_checksum(&mut self, checksum: u32) {
        self.buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[PAGE_HEADER_SIZE..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PAGE_HEADER_SIZE..]
    }

    /// CRC32 over the whole page with the checksum field treated as zero.
    fn compute_checksum(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.buf[..OFF_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.buf[OFF_CHECKSUM + 4..]);
        hasher.finalize()
    }

    /// Recomputes and stores the checksum. Must be called before any write.
    pub fn update_checksum(&mut self) {
        let checksum = self.compute_checksum();
        self.set_checksum(checksum);
    }

    /// Verifies the stored checksum against the page's current content.
    pub fn verify_checksum(&self) -> bool {
        self.checksum() == self.compute_checksum()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id())
            .field("lsn", &self.lsn())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .field("page_type", &self.page_type())
            .finish()
    }
}
