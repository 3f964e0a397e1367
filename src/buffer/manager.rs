//! Buffer manager.
//!
//! The buffer manager owns a bounded pool of page frames and mediates all
//! page access. Pages are fixed (pinned + latched) and unfixed by RAII
//! guards; replacement follows a two-queue FIFO/LRU policy. The pool index
//! is guarded by one mutex held only for pointer updates: disk reads for a
//! miss happen before the index is touched, and disk writes for an evicted
//! frame happen after the frame has been unlinked.

use crate::buffer::two_queue::TwoQueue;
use crate::error::{Result, StorageError};
use crate::storage::SegmentFiles;
use crate::types::{PageId, StorageConfig, MIN_PAGE_SIZE};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Condvar, Mutex, RawRwLock, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// A frame holding one resident page
struct Frame {
    page_id: PageId,
    /// Number of outstanding guards; pinned frames are never evicted
    pin_count: AtomicU32,
    /// Set when the in-memory contents diverge from disk; cleared on flush
    dirty: AtomicBool,
    /// Page contents behind the per-frame reader/writer latch
    data: Arc<RwLock<Vec<u8>>>,
}

impl Frame {
    fn new(page_id: PageId, data: Vec<u8>) -> Self {
        Self {
            page_id,
            pin_count: AtomicU32::new(1),
            dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(data)),
        }
    }
}

/// The pool index: page table, replacement queues, in-flight write-backs
struct PoolIndex {
    frames: HashMap<PageId, Arc<Frame>>,
    queues: TwoQueue,
    /// Pages unlinked from the pool whose dirty contents are still being
    /// written out; a fixer that misses on one of these must wait
    writeback: HashSet<PageId>,
}

/// Buffer manager: a bounded pool of page frames over segment files
pub struct BufferManager {
    page_size: usize,
    page_count: usize,
    files: SegmentFiles,
    pool: Mutex<PoolIndex>,
    writeback_done: Condvar,
}

impl BufferManager {
    /// Create a buffer manager from a configuration.
    ///
    /// Panics if `page_size` is not a power of two at least 64 bytes, or if
    /// `page_count` is zero.
    pub fn new(config: StorageConfig) -> Result<Self> {
        assert!(
            config.page_size.is_power_of_two() && config.page_size >= MIN_PAGE_SIZE,
            "page_size must be a power of two >= {}",
            MIN_PAGE_SIZE
        );
        assert!(config.page_count >= 1, "page_count must be at least 1");

        let files = SegmentFiles::new(&config.directory, config.sync_on_write)?;

        Ok(Self {
            page_size: config.page_size,
            page_count: config.page_count,
            files,
            pool: Mutex::new(PoolIndex {
                frames: HashMap::with_capacity(config.page_count),
                queues: TwoQueue::new(),
                writeback: HashSet::new(),
            }),
            writeback_done: Condvar::new(),
        })
    }

    /// Page size in bytes, fixed for the manager's lifetime
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pool capacity in pages, fixed for the manager's lifetime
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Fix a page for shared read access
    pub fn fix_page(&self, page_id: PageId) -> Result<SharedPageGuard> {
        let frame = self.fix_frame(page_id)?;
        let latch = frame.data.read_arc();
        Ok(SharedPageGuard { latch, frame })
    }

    /// Fix a page for exclusive write access
    pub fn fix_page_exclusive(&self, page_id: PageId) -> Result<ExclusivePageGuard> {
        let frame = self.fix_frame(page_id)?;
        let latch = frame.data.write_arc();
        Ok(ExclusivePageGuard { latch, frame })
    }

    /// Page ids currently in the FIFO queue, oldest first.
    ///
    /// Snapshot introspection for tests; not consistent under concurrent
    /// mutation.
    pub fn fifo_ids(&self) -> Vec<PageId> {
        self.pool.lock().queues.fifo_ids()
    }

    /// Page ids currently in the LRU queue, oldest first
    pub fn lru_ids(&self) -> Vec<PageId> {
        self.pool.lock().queues.lru_ids()
    }

    /// Write every dirty resident frame back to disk and sync all segments
    pub fn flush_all(&self) -> Result<()> {
        let frames: Vec<Arc<Frame>> = {
            let pool = self.pool.lock();
            pool.queues
                .iter()
                .filter_map(|id| pool.frames.get(&id).cloned())
                .collect()
        };

        for frame in frames {
            if frame.dirty.load(Ordering::Acquire) {
                let data = frame.data.read();
                self.files.write_page(frame.page_id, self.page_size, &data)?;
                frame.dirty.store(false, Ordering::Release);
            }
        }

        self.files.sync_all()
    }

    /// Pin the frame for `page_id`, loading the page on a miss.
    ///
    /// Returns with the pin count already incremented; the caller acquires
    /// the frame latch afterwards, outside the pool mutex.
    fn fix_frame(&self, page_id: PageId) -> Result<Arc<Frame>> {
        loop {
            {
                let mut pool = self.pool.lock();
                if let Some(frame) = pool.frames.get(&page_id).cloned() {
                    frame.pin_count.fetch_add(1, Ordering::Relaxed);
                    pool.queues.record_use(page_id);
                    return Ok(frame);
                }
                if pool.writeback.contains(&page_id) {
                    // The page is mid-eviction; its dirty contents are not
                    // on disk yet. Wait for the flush, then retry.
                    self.writeback_done.wait(&mut pool);
                    continue;
                }
            }

            // Miss: read the block with no locks held. On failure nothing
            // has been inserted and the pool is unchanged.
            let mut buf = vec![0u8; self.page_size];
            self.files.read_page(page_id, self.page_size, &mut buf)?;

            let mut pool = self.pool.lock();
            if pool.frames.contains_key(&page_id) || pool.writeback.contains(&page_id) {
                // Another fixer raced us while we were reading; retry.
                continue;
            }

            if pool.frames.len() < self.page_count {
                return Ok(Self::install(&mut pool, page_id, buf));
            }

            // Pool is full: evict the first unpinned frame, FIFO before LRU.
            let victim_id = match Self::find_victim(&pool) {
                Some(id) => id,
                None => return Err(StorageError::BufferFull),
            };
            let victim = pool
                .frames
                .remove(&victim_id)
                .ok_or_else(|| StorageError::invariant("victim frame missing from page table"))?;
            let queue = pool
                .queues
                .remove(victim_id)
                .ok_or_else(|| StorageError::invariant("victim frame missing from queues"))?;

            if !victim.dirty.load(Ordering::Acquire) {
                return Ok(Self::install(&mut pool, page_id, buf));
            }

            // Write the victim back outside the pool mutex. The write-back
            // set keeps concurrent fixers of the victim from re-reading the
            // stale on-disk copy before the flush lands.
            pool.writeback.insert(victim_id);
            drop(pool);

            let flushed = {
                let data = victim.data.read();
                self.files.write_page(victim_id, self.page_size, &data)
            };

            let mut pool = self.pool.lock();
            pool.writeback.remove(&victim_id);
            self.writeback_done.notify_all();

            if let Err(e) = flushed {
                // Relink the victim so no resident page is lost.
                pool.queues.restore(victim_id, queue);
                pool.frames.insert(victim_id, victim);
                return Err(e);
            }

            if pool.frames.contains_key(&page_id) || pool.frames.len() >= self.page_count {
                // Lost the freed slot (or the page itself appeared) while
                // flushing; start over.
                continue;
            }
            return Ok(Self::install(&mut pool, page_id, buf));
        }
    }

    /// Insert a freshly loaded page at the FIFO tail, pinned once
    fn install(pool: &mut PoolIndex, page_id: PageId, buf: Vec<u8>) -> Arc<Frame> {
        let frame = Arc::new(Frame::new(page_id, buf));
        pool.frames.insert(page_id, Arc::clone(&frame));
        pool.queues.push_fifo(page_id);
        frame
    }

    /// First unpinned frame in eviction-scan order, if any
    fn find_victim(pool: &PoolIndex) -> Option<PageId> {
        pool.queues.iter().find(|id| {
            pool.frames
                .get(id)
                .map_or(false, |f| f.pin_count.load(Ordering::Acquire) == 0)
        })
    }
}

impl Drop for BufferManager {
    /// Write all dirty resident frames to disk, FIFO list first, then LRU
    fn drop(&mut self) {
        let pool = self.pool.get_mut();
        for page_id in pool.queues.iter() {
            if let Some(frame) = pool.frames.get(&page_id) {
                if frame.dirty.load(Ordering::Acquire) {
                    let data = frame.data.read();
                    let _ = self.files.write_page(page_id, self.page_size, &data);
                }
            }
        }
    }
}

/// RAII guard for shared read access to a page.
///
/// Holds the frame latch shared and the frame pinned until dropped.
pub struct SharedPageGuard {
    latch: ArcRwLockReadGuard<RawRwLock, Vec<u8>>,
    frame: Arc<Frame>,
}

impl SharedPageGuard {
    /// The fixed page's id
    pub fn page_id(&self) -> PageId {
        self.frame.page_id
    }

    /// The page contents
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Release the fix, optionally marking the frame dirty first
    pub fn unfix(self, dirty: bool) {
        if dirty {
            self.frame.dirty.store(true, Ordering::Relaxed);
        }
    }
}

impl std::ops::Deref for SharedPageGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.latch[..]
    }
}

impl Drop for SharedPageGuard {
    fn drop(&mut self) {
        self.frame.pin_count.fetch_sub(1, Ordering::Release);
    }
}

/// RAII guard for exclusive write access to a page.
///
/// Holds the frame latch exclusively and the frame pinned until dropped.
/// Mutable access marks the frame dirty.
pub struct ExclusivePageGuard {
    latch: ArcRwLockWriteGuard<RawRwLock, Vec<u8>>,
    frame: Arc<Frame>,
}

impl ExclusivePageGuard {
    /// The fixed page's id
    pub fn page_id(&self) -> PageId {
        self.frame.page_id
    }

    /// The page contents
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Mutable page contents; marks the frame dirty
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.dirty.store(true, Ordering::Relaxed);
        &mut self.latch[..]
    }

    /// Release the fix, optionally marking the frame dirty first
    pub fn unfix(self, dirty: bool) {
        if dirty {
            self.frame.dirty.store(true, Ordering::Relaxed);
        }
    }
}

impl std::ops::Deref for ExclusivePageGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.latch[..]
    }
}

impl Drop for ExclusivePageGuard {
    fn drop(&mut self) {
        self.frame.pin_count.fetch_sub(1, Ordering::Release);
    }
}
