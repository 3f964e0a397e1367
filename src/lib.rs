//! # B+ Tree Storage
//!
//! The storage-engine core of a relational database: a paged buffer manager
//! with two-queue replacement and a B+ tree index stored on its pages.
//!
//! ## Architecture
//!
//! The engine is composed of modular, swappable components:
//!
//! - **Types** (`types`): page addressing, fixed-width key/value encoding,
//!   configuration
//! - **Storage Layer** (`storage`): positional block I/O, one file per
//!   segment
//! - **Buffer Manager** (`buffer`): bounded frame pool with FIFO/LRU
//!   replacement, pin counts and per-frame latches
//! - **Segment** (`segment`): binds a segment id to the buffer manager
//! - **B+ Tree** (`btree`): ordered index with crab-latched descent and
//!   preemptive splits
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bplus_storage::{BTree, BufferManager, StorageConfig};
//! use std::sync::Arc;
//!
//! let config = StorageConfig::new("data_dir").page_count(64);
//! let manager = Arc::new(BufferManager::new(config)?);
//!
//! let tree: BTree<u64, u64> = BTree::new(0, Arc::clone(&manager));
//! tree.insert(42, 4200)?;
//! assert_eq!(tree.lookup(42)?, Some(4200));
//! tree.erase(42)?;
//! ```

pub mod btree;
pub mod buffer;
pub mod error;
pub mod segment;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{Codec, IndexKey, PageId, StorageConfig};

// Re-export main public API
pub use btree::{BTree, TreeCheckpoint};
pub use buffer::{BufferManager, ExclusivePageGuard, SharedPageGuard};
pub use segment::Segment;
pub use storage::{BlockFile, BlockFileImpl, SegmentFiles};
