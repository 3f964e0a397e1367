//! B+ tree index.
//!
//! An ordered key→value map stored one node per page:
//! - `node`: on-page layout and typed node views
//! - `tree`: the tree itself (insert, lookup, erase)

mod node;
mod tree;

pub use tree::{BTree, TreeCheckpoint};
