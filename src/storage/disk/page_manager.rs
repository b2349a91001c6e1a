use crate::storage::error::StorageError;
use crate::storage::page::PageId;
use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 8192;

/// File-backed page store. One fixed-size page per slot, addressed by
/// `PageId`. Deallocated pages go on an in-process free list and are handed
/// back out by `allocate_page` before the file is extended; free space is
/// not tracked across restarts.
pub struct PageManager {
    file: File,
    free_pages: Vec<PageId>,
}

impl PageManager {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;

        Ok(Self {
            file,
            free_pages: Vec::new(),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open file: {:?}", path))?;

        Ok(Self {
            file,
            free_pages: Vec::new(),
        })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            bail!(
                "Buffer size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                buf.len()
            );
        }

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            return Err(StorageError::PageNotFound(page_id).into());
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file.read_exact(buf).context("Failed to read page")?;

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            bail!(
                "Data size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                data.len()
            );
        }

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            let new_size = offset + PAGE_SIZE as u64;
            self.file
                .set_len(new_size)
                .context("Failed to extend file")?;
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file.write_all(data).context("Failed to write page")?;
        self.file.sync_all().context("Failed to sync")?;

        Ok(())
    }

    pub fn num_pages(&self) -> Result<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }

    pub fn allocate_page(&mut self) -> Result<PageId> {
        if let Some(page_id) = self.free_pages.pop() {
            return Ok(page_id);
        }

        let current_pages = self.num_pages()?;
        let new_page_id = PageId(current_pages);

        let new_size = (current_pages as u64 + 1) * PAGE_SIZE as u64;
        self.file
            .set_len(new_size)
            .context("Failed to extend file")?;

        Ok(new_page_id)
    }

    /// Return a page to the allocator. The slot keeps its place in the file
    /// and will be reused by a later `allocate_page`.
    pub fn deallocate_page(&mut self, page_id: PageId) {
        debug_assert!(!self.free_pages.contains(&page_id));
        self.free_pages.push(page_id);
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}
