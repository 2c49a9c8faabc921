//! # coreengine
//!
//! An embeddable key-value and vector storage kernel: fixed-size pages
//! with checksum-validated I/O, an LRU-K buffer pool, a write-ahead
//! log, a leveled LSM-tree with Bloom filters and a MANIFEST, and an
//! HNSW graph for approximate nearest-neighbor search.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`page`] | 4 KB page: header + data region, CRC32 checksums |
//! | [`disk_manager`] | Page file I/O, allocation, durable sync |
//! | [`buffer_pool`] | LRU-K page cache over the disk manager |
//! | [`log_manager`] | ARIES-style page-level WAL and replay |
//! | [`wal`] | LSM-side Put/Delete write-ahead log |
//! | [`memtable`] | Sorted in-memory write buffer |
//! | [`sstable`] | Immutable on-disk sorted runs with Bloom filters |
//! | [`bloom`] | Double-hashing Bloom filter |
//! | [`manifest`] | Durable log of SSTable lifecycle events |
//! | [`lsm`] | Leveled organization, compaction, and merge |
//! | [`hnsw`] | In-memory HNSW vector index |
//! | [`vector`] | Fixed-dimension float vectors and distance metrics |
//! | [`config`] | Engine configuration and preset factories |
//! | [`encoding`] | Deterministic binary `Encode`/`Decode` |
//! | [`error`] | The crate-wide [`error::CoreError`] |
//! | [`engine`] | The public façade: open, put, get, delete, scan, vectors |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coreengine::config::EngineConfig;
//! use coreengine::engine::Engine;
//!
//! let engine = Engine::open(EngineConfig::embedded("/tmp/my_db")).unwrap();
//!
//! engine.put(b"hello", b"world").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! engine.delete(b"hello").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod buffer_pool;
pub mod config;
pub mod disk_manager;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod hnsw;
pub mod log_manager;
pub mod lsm;
pub mod manifest;
pub mod memtable;
pub mod page;
pub mod sstable;
pub mod vector;
pub mod wal;
