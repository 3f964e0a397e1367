//! Segment facade.
//!
//! A segment binds a segment id to the buffer manager and serves as the
//! base for any on-disk structure. It builds full page ids from
//! intra-segment page numbers and forwards fix calls.

use crate::buffer::{BufferManager, ExclusivePageGuard, SharedPageGuard};
use crate::error::Result;
use crate::types::PageId;
use std::sync::Arc;

/// A contiguous sequence of pages backed by one file
pub struct Segment {
    segment_id: u16,
    manager: Arc<BufferManager>,
}

impl Segment {
    /// Bind a segment id to a buffer manager
    pub fn new(segment_id: u16, manager: Arc<BufferManager>) -> Self {
        Self {
            segment_id,
            manager,
        }
    }

    /// This segment's id
    pub fn segment_id(&self) -> u16 {
        self.segment_id
    }

    /// The buffer manager backing this segment
    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    /// Build the full page id for a page number within this segment
    pub fn page_id(&self, offset: u64) -> PageId {
        PageId::new(self.segment_id, offset)
    }

    /// Fix a page of this segment for shared read access
    pub fn fix_shared(&self, page_id: PageId) -> Result<SharedPageGuard> {
        self.manager.fix_page(page_id)
    }

    /// Fix a page of this segment for exclusive write access
    pub fn fix_exclusive(&self, page_id: PageId) -> Result<ExclusivePageGuard> {
        self.manager.fix_page_exclusive(page_id)
    }
}
