//! Two-queue (FIFO + LRU) replacement index.
//!
//! Pages enter the FIFO queue when first loaded and are promoted to the LRU
//! queue on a subsequent fix. Both queues insert at the tail; eviction scans
//! the FIFO queue head to tail, then the LRU queue.

use crate::types::PageId;
use std::collections::HashMap;

/// Which queue a page resides in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Pages loaded at most once since entering the pool
    Fifo,
    /// Pages fixed again after their initial load
    Lru,
}

/// An ordered queue of page ids with O(1) insert, removal and re-ordering
///
/// Backed by a slab of doubly-linked nodes plus a hash index from page id
/// to slab position. Head is the oldest entry, tail the most recent.
struct LinkedQueue {
    positions: HashMap<PageId, usize>,
    nodes: Vec<QueueNode>,
    head: Option<usize>,
    tail: Option<usize>,
    free_slots: Vec<usize>,
}

#[derive(Clone, Copy)]
struct QueueNode {
    page_id: PageId,
    prev: Option<usize>,
    next: Option<usize>,
}

impl LinkedQueue {
    fn new() -> Self {
        Self {
            positions: HashMap::new(),
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_slots: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.positions.len()
    }

    fn contains(&self, page_id: PageId) -> bool {
        self.positions.contains_key(&page_id)
    }

    /// Insert a page at the tail (most recent position)
    fn push_tail(&mut self, page_id: PageId) {
        debug_assert!(!self.contains(page_id));

        let node = QueueNode {
            page_id,
            prev: self.tail,
            next: None,
        };

        let pos = if let Some(pos) = self.free_slots.pop() {
            self.nodes[pos] = node;
            pos
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        };

        if let Some(old_tail) = self.tail {
            self.nodes[old_tail].next = Some(pos);
        }
        self.tail = Some(pos);

        if self.head.is_none() {
            self.head = Some(pos);
        }

        self.positions.insert(page_id, pos);
    }

    /// Remove a page; returns false if it was not present
    fn remove(&mut self, page_id: PageId) -> bool {
        match self.positions.remove(&page_id) {
            Some(pos) => {
                self.unlink(pos);
                self.free_slots.push(pos);
                true
            }
            None => false,
        }
    }

    /// Move a present page to the tail
    fn move_to_tail(&mut self, page_id: PageId) {
        if let Some(&pos) = self.positions.get(&page_id) {
            if self.tail == Some(pos) {
                return;
            }
            self.unlink(pos);
            self.nodes[pos].prev = self.tail;
            self.nodes[pos].next = None;
            if let Some(old_tail) = self.tail {
                self.nodes[old_tail].next = Some(pos);
            }
            self.tail = Some(pos);
            if self.head.is_none() {
                self.head = Some(pos);
            }
        }
    }

    /// Unlink a node from the list without freeing its slot
    fn unlink(&mut self, pos: usize) {
        let node = self.nodes[pos];

        if let Some(prev) = node.prev {
            self.nodes[prev].next = node.next;
        } else {
            self.head = node.next;
        }

        if let Some(next) = node.next {
            self.nodes[next].prev = node.prev;
        } else {
            self.tail = node.prev;
        }
    }

    /// Iterate page ids from head (oldest) to tail (most recent)
    fn iter(&self) -> QueueIter<'_> {
        QueueIter {
            queue: self,
            cursor: self.head,
        }
    }

    fn ids(&self) -> Vec<PageId> {
        self.iter().collect()
    }
}

struct QueueIter<'a> {
    queue: &'a LinkedQueue,
    cursor: Option<usize>,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = PageId;

    fn next(&mut self) -> Option<PageId> {
        let pos = self.cursor?;
        let node = &self.queue.nodes[pos];
        self.cursor = node.next;
        Some(node.page_id)
    }
}

/// The FIFO + LRU pair used by the buffer manager's replacement policy
pub struct TwoQueue {
    fifo: LinkedQueue,
    lru: LinkedQueue,
}

impl TwoQueue {
    pub fn new() -> Self {
        Self {
            fifo: LinkedQueue::new(),
            lru: LinkedQueue::new(),
        }
    }

    /// Total number of tracked pages
    pub fn len(&self) -> usize {
        self.fifo.len() + self.lru.len()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.fifo.contains(page_id) || self.lru.contains(page_id)
    }

    /// Track a newly loaded page at the FIFO tail
    pub fn push_fifo(&mut self, page_id: PageId) {
        debug_assert!(!self.lru.contains(page_id));
        self.fifo.push_tail(page_id);
    }

    /// Record a fix of an already resident page.
    ///
    /// A page in the LRU queue moves to its tail; a page still in the FIFO
    /// queue is promoted to the LRU tail. A page is never promoted on its
    /// initial load.
    pub fn record_use(&mut self, page_id: PageId) {
        if self.lru.contains(page_id) {
            self.lru.move_to_tail(page_id);
        } else if self.fifo.remove(page_id) {
            self.lru.push_tail(page_id);
        }
    }

    /// Stop tracking a page, reporting which queue held it
    pub fn remove(&mut self, page_id: PageId) -> Option<QueueKind> {
        if self.fifo.remove(page_id) {
            Some(QueueKind::Fifo)
        } else if self.lru.remove(page_id) {
            Some(QueueKind::Lru)
        } else {
            None
        }
    }

    /// Re-insert a page at the tail of the given queue (eviction rollback)
    pub fn restore(&mut self, page_id: PageId, kind: QueueKind) {
        match kind {
            QueueKind::Fifo => self.fifo.push_tail(page_id),
            QueueKind::Lru => self.lru.push_tail(page_id),
        }
    }

    /// Iterate in eviction-scan order: FIFO head→tail, then LRU head→tail
    pub fn iter(&self) -> impl Iterator<Item = PageId> + '_ {
        self.fifo.iter().chain(self.lru.iter())
    }

    /// Snapshot of the FIFO queue, head first
    pub fn fifo_ids(&self) -> Vec<PageId> {
        self.fifo.ids()
    }

    /// Snapshot of the LRU queue, head first
    pub fn lru_ids(&self) -> Vec<PageId> {
        self.lru.ids()
    }
}
