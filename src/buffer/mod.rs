//! Buffer manager: bounded in-memory page cache with 2Q replacement.
//!
//! Pages are fixed through RAII guards that pin the frame and hold its
//! reader/writer latch; unfixing happens on drop. Replacement uses a FIFO
//! queue for once-loaded pages and an LRU queue for re-used ones.

mod manager;
mod two_queue;

pub use manager::{BufferManager, ExclusivePageGuard, SharedPageGuard};
