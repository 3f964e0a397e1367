//! Storage layer: positional block I/O on per-segment files.

mod block_file;

pub use block_file::{BlockFile, BlockFileImpl, SegmentFiles};
