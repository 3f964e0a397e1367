//! B+ tree index.
//!
//! An ordered map from fixed-width keys to fixed-width values, stored one
//! node per page in a single segment. Operations descend root to leaf,
//! fixing pages through the buffer manager and holding each parent's latch
//! until its child is fixed (crab-latching). Insertion splits any full
//! inner node on the way down, so separators always land in a parent with
//! room and no descent ever has to ascend.

use crate::btree::node::{
    self, InnerView, InnerViewMut, LeafView, LeafViewMut,
};
use crate::buffer::{BufferManager, ExclusivePageGuard};
use crate::error::{Result, StorageError};
use crate::segment::Segment;
use crate::types::{Codec, IndexKey, PageId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// In-memory tree metadata; the on-disk layout is purely positional and
/// carries no metadata page
struct TreeMeta {
    root: Option<PageId>,
    next_page_id: u64,
}

/// Serialisable snapshot of the tree metadata.
///
/// The disk layout has no header page, so the caller persists this
/// out-of-band and hands it back to [`BTree::restore`] after reopening the
/// buffer manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeCheckpoint {
    /// Root page number within the segment, if the tree is non-empty
    pub root: Option<u64>,
    /// Next page number to allocate
    pub next_page_id: u64,
}

/// A B+ tree over one segment of the buffer manager.
///
/// Operations are atomic with respect to each other: lookups and erases
/// share the metadata lock, inserts take it exclusively.
pub struct BTree<K: IndexKey, V: Codec> {
    segment: Segment,
    leaf_capacity: usize,
    inner_capacity: usize,
    meta: RwLock<TreeMeta>,
    /// Erased keys hidden from lookups; shared reads, exclusive updates
    tombstones: RwLock<HashSet<K>>,
    _values: PhantomData<V>,
}

impl<K: IndexKey, V: Codec> BTree<K, V> {
    /// Create an empty tree over the given segment
    pub fn new(segment_id: u16, manager: Arc<BufferManager>) -> Self {
        let page_size = manager.page_size();
        Self {
            segment: Segment::new(segment_id, manager),
            leaf_capacity: node::leaf_capacity::<K, V>(page_size),
            inner_capacity: node::inner_capacity::<K>(page_size),
            meta: RwLock::new(TreeMeta {
                root: None,
                next_page_id: 1,
            }),
            tombstones: RwLock::new(HashSet::new()),
            _values: PhantomData,
        }
    }

    /// Reattach a tree from a checkpoint taken before its manager was
    /// destroyed
    pub fn restore(
        segment_id: u16,
        manager: Arc<BufferManager>,
        checkpoint: TreeCheckpoint,
    ) -> Result<Self> {
        if checkpoint.next_page_id == 0 {
            return Err(StorageError::invariant("checkpoint next_page_id is zero"));
        }
        if let Some(root) = checkpoint.root {
            if root >= checkpoint.next_page_id {
                return Err(StorageError::invariant(
                    "checkpoint root lies beyond the allocated pages",
                ));
            }
        }

        let tree = Self::new(segment_id, manager);
        {
            let mut meta = tree.meta.write();
            meta.root = checkpoint.root.map(|offset| tree.segment.page_id(offset));
            meta.next_page_id = checkpoint.next_page_id;
        }
        Ok(tree)
    }

    /// Snapshot the tree metadata for out-of-band persistence
    pub fn checkpoint(&self) -> TreeCheckpoint {
        let meta = self.meta.read();
        TreeCheckpoint {
            root: meta.root.map(|id| id.segment_offset()),
            next_page_id: meta.next_page_id,
        }
    }

    /// Height of the tree: 0 when empty, 1 for a lone leaf root
    pub fn height(&self) -> Result<u32> {
        let meta = self.meta.read();
        match meta.root {
            None => Ok(0),
            Some(root) => {
                let guard = self.segment.fix_shared(root)?;
                Ok(node::node_level(&guard) as u32 + 1)
            }
        }
    }

    /// Insert a key/value pair, overwriting the value if the key is present
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut meta = self.meta.write();

        let root = match meta.root {
            Some(root) => root,
            None => {
                // The first insert materialises the root as page 0.
                let root = self.segment.page_id(0);
                {
                    let mut guard = self.segment.fix_exclusive(root)?;
                    LeafViewMut::<K, V>::init(guard.data_mut());
                }
                meta.root = Some(root);
                meta.next_page_id = 1;
                root
            }
        };

        let mut current = root;
        let mut parent: Option<ExclusivePageGuard> = None;

        loop {
            let mut guard = self.segment.fix_exclusive(current)?;

            if node::node_level(&guard) == 0 {
                self.leaf_insert(&mut meta, parent, guard, current, key, value)?;
                break;
            }

            // Split any full inner node before descending through it, so a
            // later split below always finds room in its parent.
            if node::node_count(&guard) as usize == self.inner_capacity + 1 {
                let (right_id, mut right_guard) = self.allocate_page(&mut meta)?;
                let separator = {
                    let mut left = InnerViewMut::<K>::new(guard.data_mut());
                    let level = left.level();
                    let mut right = InnerViewMut::<K>::init(right_guard.data_mut(), level);
                    left.split_into(&mut right)
                };

                if let Some(parent_guard) = parent.as_mut() {
                    Self::insert_separator(parent_guard, separator, right_id);
                } else {
                    let level = node::node_level(&guard) + 1;
                    let new_root = self.grow_root(&mut meta, current, separator, right_id, level)?;
                    parent = Some(new_root);
                }

                // Resume the descent on whichever half now covers the key.
                if key > separator {
                    guard = right_guard;
                    current = right_id;
                }
            }

            let child = InnerView::<K>::new(&guard).descend(&key);
            parent = Some(guard);
            current = child;
        }

        self.tombstones.write().remove(&key);
        Ok(())
    }

    /// Look up the value for a key, if present and not erased
    pub fn lookup(&self, key: K) -> Result<Option<V>> {
        if self.tombstones.read().contains(&key) {
            return Ok(None);
        }

        let meta = self.meta.read();
        let root = match meta.root {
            Some(root) => root,
            None => return Ok(None),
        };

        let mut guard = self.segment.fix_shared(root)?;
        while node::node_level(&guard) > 0 {
            let child = InnerView::<K>::new(&guard).descend(&key);
            guard = self.segment.fix_shared(child)?;
        }

        Ok(LeafView::<K, V>::new(&guard).find(&key))
    }

    /// Erase a key: remove its leaf entry if present and hide it from
    /// lookups. Underfull nodes are not merged.
    pub fn erase(&self, key: K) -> Result<()> {
        let meta = self.meta.read();

        if let Some(root) = meta.root {
            let mut guard = self.segment.fix_exclusive(root)?;
            while node::node_level(&guard) > 0 {
                let child = InnerView::<K>::new(&guard).descend(&key);
                guard = self.segment.fix_exclusive(child)?;
            }

            let (slot, exact) = LeafView::<K, V>::new(&guard).search_slot(&key);
            if exact {
                LeafViewMut::<K, V>::new(guard.data_mut()).remove_at(slot);
            }
        }

        self.tombstones.write().insert(key);
        Ok(())
    }

    /// Allocate a fresh page and fix it exclusively
    fn allocate_page(&self, meta: &mut TreeMeta) -> Result<(PageId, ExclusivePageGuard)> {
        let page_id = self.segment.page_id(meta.next_page_id);
        meta.next_page_id += 1;
        let guard = self.segment.fix_exclusive(page_id)?;
        Ok((page_id, guard))
    }

    /// Finish an insert at the leaf, splitting if it is full
    fn leaf_insert(
        &self,
        meta: &mut TreeMeta,
        mut parent: Option<ExclusivePageGuard>,
        mut guard: ExclusivePageGuard,
        current: PageId,
        key: K,
        value: V,
    ) -> Result<()> {
        let (slot, exact) = LeafView::<K, V>::new(&guard).search_slot(&key);

        // Overwrites are detected before any split is considered.
        if exact {
            LeafViewMut::<K, V>::new(guard.data_mut()).set_value(slot, value);
            return Ok(());
        }
        if (node::node_count(&guard) as usize) < self.leaf_capacity {
            LeafViewMut::<K, V>::new(guard.data_mut()).insert_at(slot, key, value);
            return Ok(());
        }

        // Full leaf: split, place the new entry, wire the separator upward.
        let (right_id, mut right_guard) = self.allocate_page(meta)?;
        let separator = {
            let mut left = LeafViewMut::<K, V>::new(guard.data_mut());
            let mut right = LeafViewMut::<K, V>::init(right_guard.data_mut());
            let separator = left.split_into(&mut right);
            if key <= separator {
                let (slot, _) = left.search_slot(&key);
                left.insert_at(slot, key, value);
            } else {
                let (slot, _) = right.search_slot(&key);
                right.insert_at(slot, key, value);
            }
            separator
        };

        if let Some(parent_guard) = parent.as_mut() {
            Self::insert_separator(parent_guard, separator, right_id);
        } else {
            self.grow_root(meta, current, separator, right_id, 1)?;
        }
        Ok(())
    }

    /// Insert a separator and its right child into a non-full inner node
    fn insert_separator(parent: &mut ExclusivePageGuard, separator: K, right_child: PageId) {
        let mut inner = InnerViewMut::<K>::new(parent.data_mut());
        debug_assert!(inner.count() <= inner.capacity(), "parent has no room");
        let slot = inner.lower_bound(&separator).unwrap_or(inner.count() - 1);
        inner.insert_at(slot, separator, right_child);
    }

    /// Install a new root above a split node and return it fixed
    fn grow_root(
        &self,
        meta: &mut TreeMeta,
        left: PageId,
        separator: K,
        right: PageId,
        level: u16,
    ) -> Result<ExclusivePageGuard> {
        let (root_id, mut guard) = self.allocate_page(meta)?;
        {
            let mut root = InnerViewMut::<K>::init(guard.data_mut(), level);
            root.set_child(0, left);
            root.set_key(0, separator);
            root.set_child(1, right);
            root.set_count(2);
        }
        meta.root = Some(root_id);
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageConfig;
    use rand::prelude::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    const LEAF_CAPACITY: u64 = 254; // page_size 4096, K = V = u64

    fn tree_with(
        dir: &std::path::Path,
        page_size: usize,
        page_count: usize,
    ) -> (BTree<u64, u64>, Arc<BufferManager>) {
        let config = StorageConfig::new(dir)
            .page_size(page_size)
            .page_count(page_count);
        let manager = Arc::new(BufferManager::new(config).unwrap());
        (BTree::new(0, Arc::clone(&manager)), manager)
    }

    /// Walk the whole tree checking depth, separator bounds and leaf order.
    /// Returns the common leaf depth.
    fn check_subtree(
        tree: &BTree<u64, u64>,
        page: PageId,
        lower: Option<u64>,
        upper: Option<u64>,
        depth: u32,
        leaf_depths: &mut Vec<u32>,
    ) -> Result<()> {
        let guard = tree.segment.fix_shared(page)?;

        if node::node_level(&guard) == 0 {
            leaf_depths.push(depth);
            let leaf = LeafView::<u64, u64>::new(&guard);
            let mut prev = None;
            for i in 0..leaf.count() {
                let key = leaf.key_at(i);
                if let Some(prev) = prev {
                    assert!(key > prev, "leaf keys not strictly ascending");
                }
                if let Some(lower) = lower {
                    assert!(key > lower, "key {} <= lower bound {}", key, lower);
                }
                if let Some(upper) = upper {
                    assert!(key <= upper, "key {} > upper bound {}", key, upper);
                }
                prev = Some(key);
            }
            return Ok(());
        }

        let inner = InnerView::<u64>::new(&guard);
        let count = inner.count();
        assert!(count >= 2, "inner node with fewer than two children");
        for i in 1..count - 1 {
            assert!(inner.key_at(i - 1) < inner.key_at(i), "separators not ascending");
        }
        for i in 0..count {
            let child_lower = if i == 0 { lower } else { Some(inner.key_at(i - 1)) };
            let child_upper = if i + 1 < count { Some(inner.key_at(i)) } else { upper };
            check_subtree(tree, inner.child_at(i), child_lower, child_upper, depth + 1, leaf_depths)?;
        }
        Ok(())
    }

    fn check_invariants(tree: &BTree<u64, u64>) -> Result<()> {
        let root = match tree.meta.read().root {
            Some(root) => root,
            None => return Ok(()),
        };
        let mut leaf_depths = Vec::new();
        check_subtree(tree, root, None, None, 0, &mut leaf_depths)?;
        let first = leaf_depths[0];
        assert!(
            leaf_depths.iter().all(|&d| d == first),
            "leaves at unequal depths"
        );
        Ok(())
    }

    /// Number of physical entries for `key` in the leaf that covers it
    fn physical_entries(tree: &BTree<u64, u64>, key: u64) -> Result<usize> {
        let mut guard = tree.segment.fix_shared(tree.meta.read().root.unwrap())?;
        while node::node_level(&guard) > 0 {
            let child = InnerView::<u64>::new(&guard).descend(&key);
            guard = tree.segment.fix_shared(child)?;
        }
        let leaf = LeafView::<u64, u64>::new(&guard);
        Ok((0..leaf.count()).filter(|&i| leaf.key_at(i) == key).count())
    }

    #[test]
    fn test_single_insert_lookup() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);

        tree.insert(7, 700)?;
        assert_eq!(tree.lookup(7)?, Some(700));
        assert_eq!(tree.lookup(8)?, None);

        Ok(())
    }

    #[test]
    fn test_overwrite_keeps_single_entry() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);

        tree.insert(3, 30)?;
        tree.insert(3, 33)?;
        assert_eq!(tree.lookup(3)?, Some(33));
        assert_eq!(physical_entries(&tree, 3)?, 1);

        Ok(())
    }

    #[test]
    fn test_leaf_split_creates_inner_root() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);

        for i in 1..=LEAF_CAPACITY + 1 {
            tree.insert(i, 100 * i)?;
        }

        assert_eq!(tree.height()?, 2);
        assert_eq!(tree.lookup(1)?, Some(100));
        assert_eq!(tree.lookup(LEAF_CAPACITY + 1)?, Some(100 * (LEAF_CAPACITY + 1)));
        check_invariants(&tree)?;

        Ok(())
    }

    #[test]
    fn test_inner_split_grows_root_to_level_two() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);

        let mut n = 0u64;
        while tree.height()? < 3 {
            n += 1;
            tree.insert(n, n * 2)?;
            assert!(n < 100_000, "tree never reached height 3");
        }

        check_invariants(&tree)?;
        for i in 1..=n {
            assert_eq!(tree.lookup(i)?, Some(i * 2), "lost key {}", i);
        }

        Ok(())
    }

    #[test]
    fn test_eviction_pressure_and_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let keys = 10_000u64;

        let checkpoint = {
            let config = StorageConfig::new(dir.path()).page_size(4096).page_count(4);
            let manager = Arc::new(BufferManager::new(config).unwrap());
            let tree: BTree<u64, u64> = BTree::new(1, Arc::clone(&manager));

            for i in 0..keys {
                tree.insert(i, i + 1)?;
            }

            let checkpoint = tree.checkpoint();
            drop(tree);
            drop(manager); // destructor flushes all dirty frames
            checkpoint
        };

        let config = StorageConfig::new(dir.path()).page_size(4096).page_count(4);
        let manager = Arc::new(BufferManager::new(config).unwrap());
        let tree: BTree<u64, u64> = BTree::restore(1, manager, checkpoint)?;

        for i in 0..keys {
            assert_eq!(tree.lookup(i)?, Some(i + 1), "lost key {}", i);
        }

        Ok(())
    }

    #[test]
    fn test_erase_tombstone_and_reinsert() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);

        tree.insert(5, 50)?;
        assert_eq!(tree.lookup(5)?, Some(50));

        tree.erase(5)?;
        assert_eq!(tree.lookup(5)?, None);

        tree.insert(5, 55)?;
        assert_eq!(tree.lookup(5)?, Some(55));

        Ok(())
    }

    #[test]
    fn test_erase_is_idempotent() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);

        tree.insert(1, 10)?;
        tree.erase(1)?;
        tree.erase(1)?;
        assert_eq!(tree.lookup(1)?, None);

        // Erasing a key that never existed is also fine.
        tree.erase(99)?;
        assert_eq!(tree.lookup(99)?, None);

        Ok(())
    }

    #[test]
    fn test_overwrite_in_full_leaf_does_not_split() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);

        for i in 1..=LEAF_CAPACITY {
            tree.insert(i, i)?;
        }
        assert_eq!(tree.height()?, 1);

        tree.insert(LEAF_CAPACITY / 2, 4242)?;
        assert_eq!(tree.height()?, 1, "overwrite must not split");
        assert_eq!(tree.lookup(LEAF_CAPACITY / 2)?, Some(4242));

        Ok(())
    }

    #[test]
    fn test_empty_tree_lookup_and_checkpoint() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);

        assert_eq!(tree.lookup(1)?, None);
        assert_eq!(tree.height()?, 0);

        let checkpoint = tree.checkpoint();
        assert_eq!(checkpoint.root, None);
        assert_eq!(checkpoint.next_page_id, 1);

        Ok(())
    }

    #[test]
    fn test_restore_rejects_bad_checkpoint() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path()).page_size(4096).page_count(10);
        let manager = Arc::new(BufferManager::new(config).unwrap());

        let bad = TreeCheckpoint {
            root: Some(5),
            next_page_id: 3,
        };
        let result: Result<BTree<u64, u64>> = BTree::restore(0, manager, bad);
        assert!(matches!(result, Err(StorageError::InvariantViolated(_))));
    }

    #[test]
    fn test_random_workload_matches_model() -> Result<()> {
        let dir = tempdir().unwrap();
        // Small pages force deep trees and many splits.
        let (tree, _mgr) = tree_with(dir.path(), 256, 16);

        let mut rng = StdRng::seed_from_u64(0xB7EE);
        let mut model = BTreeMap::new();

        for _ in 0..4000 {
            let key = rng.gen_range(0..1500u64);
            match rng.gen_range(0..10) {
                0..=6 => {
                    let value = rng.gen::<u64>();
                    tree.insert(key, value)?;
                    model.insert(key, value);
                }
                _ => {
                    tree.erase(key)?;
                    model.remove(&key);
                }
            }
        }

        check_invariants(&tree)?;
        for key in 0..1500u64 {
            assert_eq!(tree.lookup(key)?, model.get(&key).copied(), "key {}", key);
        }

        Ok(())
    }

    #[test]
    fn test_concurrent_inserts_and_lookups() -> Result<()> {
        let dir = tempdir().unwrap();
        let (tree, _mgr) = tree_with(dir.path(), 4096, 10);
        let tree = Arc::new(tree);

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let tree = Arc::clone(&tree);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = t * 1000 + i;
                        tree.insert(key, key * 3).unwrap();
                        assert_eq!(tree.lookup(key).unwrap(), Some(key * 3));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..4u64 {
            for i in 0..500 {
                let key = t * 1000 + i;
                assert_eq!(tree.lookup(key)?, Some(key * 3));
            }
        }
        check_invariants(&tree)?;

        Ok(())
    }
}
