//! Block file layer.
//!
//! Each segment is backed by one file, named with the decimal segment id,
//! holding its pages back-to-back with no header: the byte range of a page
//! is purely positional. The file access is kept behind a trait so that the
//! backend can be swapped or mocked in tests.

use crate::error::Result;
use crate::types::PageId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Positional block I/O on a single segment file
pub trait BlockFile: Send + Sync {
    /// Read `buf.len()` bytes starting at `offset`.
    ///
    /// Bytes beyond the current end of the file read as zero, so a freshly
    /// allocated page can be read before its first write-back.
    fn read_block(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `offset`, extending the file as needed
    fn write_block(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Sync file contents to durable storage
    fn sync(&self) -> Result<()>;
}

/// File-based block file implementation
pub struct BlockFileImpl {
    file: Mutex<File>,
    sync_on_write: bool,
}

impl BlockFileImpl {
    /// Open or create a segment file
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            sync_on_write,
        })
    }
}

impl BlockFile for BlockFileImpl {
    fn read_block(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len();

        if offset >= len {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = (len - offset).min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);

        Ok(())
    }

    fn write_block(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }
}

/// Registry of open segment files, one per segment id
pub struct SegmentFiles {
    directory: PathBuf,
    sync_on_write: bool,
    files: RwLock<HashMap<u16, Arc<dyn BlockFile>>>,
}

impl SegmentFiles {
    /// Create a registry rooted at `directory`, creating it if necessary
    pub fn new<P: Into<PathBuf>>(directory: P, sync_on_write: bool) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;

        Ok(Self {
            directory,
            sync_on_write,
            files: RwLock::new(HashMap::new()),
        })
    }

    /// Get the open file for a segment, opening it on first use
    pub fn segment(&self, segment_id: u16) -> Result<Arc<dyn BlockFile>> {
        {
            let files = self.files.read();
            if let Some(file) = files.get(&segment_id) {
                return Ok(Arc::clone(file));
            }
        }

        let mut files = self.files.write();
        // Another thread may have opened it while we upgraded.
        if let Some(file) = files.get(&segment_id) {
            return Ok(Arc::clone(file));
        }

        let path = self.directory.join(segment_id.to_string());
        let file: Arc<dyn BlockFile> = Arc::new(BlockFileImpl::open(&path, self.sync_on_write)?);
        files.insert(segment_id, Arc::clone(&file));
        Ok(file)
    }

    /// Read the page identified by `page_id` into `buf`
    pub fn read_page(&self, page_id: PageId, page_size: usize, buf: &mut [u8]) -> Result<()> {
        let file = self.segment(page_id.segment())?;
        file.read_block(page_id.byte_offset(page_size), buf)
    }

    /// Write the page identified by `page_id` from `data`
    pub fn write_page(&self, page_id: PageId, page_size: usize, data: &[u8]) -> Result<()> {
        let file = self.segment(page_id.segment())?;
        file.write_block(page_id.byte_offset(page_size), data)
    }

    /// Sync every open segment file
    pub fn sync_all(&self) -> Result<()> {
        let files = self.files.read();
        for file in files.values() {
            file.sync()?;
        }
        Ok(())
    }
}
