pub mod lru;
pub mod replacer;

use crate::storage::error::StorageError;
use crate::storage::{PageId, PageManager, PAGE_SIZE};
use anyhow::Result;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    page_id: Option<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            page_id: None,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        self.data.fill(0);
    }
}

/// Page cache with pin counting. Fetching or allocating a page pins it and
/// hands back a guard; dropping the guard is the matching unpin. A page
/// whose pin count is zero is evictable, and dirty frames are written back
/// before their frame is reused.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    page_table: DashMap<PageId, FrameId>,
    frames: RwLock<HashMap<FrameId, Frame>>,
    replacer: Mutex<Box<dyn Replacer>>,
    page_manager: Mutex<PageManager>,
    next_frame_id: AtomicU32,
    max_frames: usize,
}

impl BufferPoolManager {
    pub fn new(page_manager: PageManager, replacer: Box<dyn Replacer>, max_frames: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                page_table: DashMap::new(),
                frames: RwLock::new(HashMap::with_capacity(max_frames)),
                replacer: Mutex::new(replacer),
                page_manager: Mutex::new(page_manager),
                next_frame_id: AtomicU32::new(0),
                max_frames,
            }),
        }
    }

    /// Pin `page_id` for reading.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard> {
        let frame_id = self.pin_frame(page_id, false)?;

        let frames = self.inner.frames.read();
        let frame = frames.get(&frame_id).unwrap();
        let data = frame.data.as_ref() as *const [u8; PAGE_SIZE];
        drop(frames);

        Ok(PageReadGuard {
            inner: self.inner.clone(),
            frame_id,
            data,
        })
    }

    /// Pin `page_id` for writing. The frame is marked dirty up front.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard> {
        let frame_id = self.pin_frame(page_id, true)?;

        let mut frames = self.inner.frames.write();
        let frame = frames.get_mut(&frame_id).unwrap();
        let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
        drop(frames);

        Ok(PageWriteGuard {
            inner: self.inner.clone(),
            frame_id,
            data,
        })
    }

    /// Allocate a fresh page, pinned and zero-filled.
    pub fn new_page(&self) -> Result<(PageId, PageWriteGuard)> {
        let frame_id = self.get_frame()?;

        let page_id = {
            let mut page_manager = self.inner.page_manager.lock();
            page_manager.allocate_page()?
        };

        let mut frames = self.inner.frames.write();
        let frame = frames.get_mut(&frame_id).unwrap();
        frame.reset();
        frame.page_id = Some(page_id);
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(true, Ordering::SeqCst);
        let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
        drop(frames);

        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);

        Ok((
            page_id,
            PageWriteGuard {
                inner: self.inner.clone(),
                frame_id,
                data,
            },
        ))
    }

    /// Release a page back to the allocator. The caller must hold no guard
    /// on it: a pinned page cannot be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        if let Some((_, frame_id)) = self.inner.page_table.remove(&page_id) {
            {
                let mut frames = self.inner.frames.write();
                if let Some(frame) = frames.get_mut(&frame_id) {
                    if frame.pin_count.load(Ordering::SeqCst) > 0 {
                        self.inner.page_table.insert(page_id, frame_id);
                        return Err(StorageError::PagePinned(page_id).into());
                    }
                    frame.reset();
                }
            }
            // The emptied frame is immediately evictable.
            self.inner.replacer.lock().unpin(frame_id);
        }
        self.inner.page_manager.lock().deallocate_page(page_id);
        Ok(())
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    let mut page_manager = self.inner.page_manager.lock();
                    page_manager.write_page(page_id, frame.data.as_ref())?;
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let frames = self.inner.frames.read();
        let mut page_manager = self.inner.page_manager.lock();

        for frame in frames.values() {
            if let Some(page_id) = frame.page_id {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    page_manager.write_page(page_id, frame.data.as_ref())?;
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }

        Ok(())
    }

    /// Number of pages the backing file holds.
    pub fn num_pages(&self) -> Result<u32> {
        self.inner.page_manager.lock().num_pages()
    }

    /// Pin the frame holding `page_id`, reading it in from disk on a miss.
    fn pin_frame(&self, page_id: PageId, mark_dirty: bool) -> Result<FrameId> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                frame.pin_count.fetch_add(1, Ordering::SeqCst);
                if mark_dirty {
                    frame.is_dirty.store(true, Ordering::SeqCst);
                }
                self.inner.replacer.lock().pin(frame_id);
                return Ok(frame_id);
            }
        }

        let frame_id = self.get_frame()?;

        let load_result = {
            let mut page_manager = self.inner.page_manager.lock();
            let mut frames = self.inner.frames.write();
            let frame = frames.get_mut(&frame_id).unwrap();

            match page_manager.read_page(page_id, frame.data.as_mut()) {
                Ok(()) => {
                    frame.page_id = Some(page_id);
                    frame.pin_count.store(1, Ordering::SeqCst);
                    frame.is_dirty.store(mark_dirty, Ordering::SeqCst);
                    Ok(())
                }
                Err(e) => {
                    frame.reset();
                    Err(e)
                }
            }
        };

        if let Err(e) = load_result {
            // Hand the claimed frame back so the miss does not leak it.
            self.inner.replacer.lock().unpin(frame_id);
            return Err(e);
        }

        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);
        Ok(frame_id)
    }

    fn get_frame(&self) -> Result<FrameId> {
        // Grow the pool while under the frame limit.
        {
            let frames = self.inner.frames.read();
            if frames.len() < self.inner.max_frames {
                drop(frames);
                let mut frames = self.inner.frames.write();
                // Re-check after swapping to the write lock.
                if frames.len() < self.inner.max_frames {
                    let frame_id = self.inner.next_frame_id.fetch_add(1, Ordering::SeqCst);
                    frames.insert(frame_id, Frame::new());
                    return Ok(frame_id);
                }
            }
        }

        // At capacity: evict an unpinned frame.
        let evict_frame_id = {
            let mut replacer = self.inner.replacer.lock();
            replacer
                .evict()
                .ok_or(StorageError::BufferPoolFull)?
        };

        let (old_page_id, is_dirty, data) = {
            let frames = self.inner.frames.read();
            match frames.get(&evict_frame_id) {
                Some(frame) => (
                    frame.page_id,
                    frame.is_dirty.load(Ordering::SeqCst),
                    frame.data.clone(),
                ),
                None => return Ok(evict_frame_id),
            }
        };

        // Write back without the frames lock held.
        if let Some(page_id) = old_page_id {
            if is_dirty {
                let mut page_manager = self.inner.page_manager.lock();
                page_manager.write_page(page_id, data.as_ref())?;
            }
            self.inner.page_table.remove(&page_id);
        }

        {
            let mut frames = self.inner.frames.write();
            if let Some(frame) = frames.get_mut(&evict_frame_id) {
                frame.reset();
            }
        }

        Ok(evict_frame_id)
    }
}

fn unpin_frame(inner: &BufferPoolInner, frame_id: FrameId) {
    let should_unpin = {
        let frames = inner.frames.read();
        match frames.get(&frame_id) {
            Some(frame) => frame.pin_count.fetch_sub(1, Ordering::SeqCst) == 1,
            None => false,
        }
    };

    if should_unpin {
        inner.replacer.lock().unpin(frame_id);
    }
}

pub struct PageReadGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    data: *const [u8; PAGE_SIZE],
}

impl Deref for PageReadGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.data }
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        unpin_frame(&self.inner, self.frame_id);
    }
}

pub struct PageWriteGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    data: *mut [u8; PAGE_SIZE],
}

impl Deref for PageWriteGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.data }
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.data }
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        unpin_frame(&self.inner, self.frame_id);
    }
}

// The raw pointers alias frame buffers that stay alive for the guard's
// lifetime (the pin keeps the frame from being evicted or reused).
unsafe impl Send for PageReadGuard {}
unsafe impl Sync for PageReadGuard {}
unsafe impl Send for PageWriteGuard {}
unsafe impl Sync for PageWriteGuard {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::PageManager;
    use tempfile::tempdir;

    fn create_test_buffer_pool(max_frames: usize) -> Result<BufferPoolManager> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let page_manager = PageManager::create(&file_path)?;
        let replacer = Box::new(lru::LruReplacer::new());
        Ok(BufferPoolManager::new(page_manager, replacer, max_frames))
    }

    #[test]
    fn test_new_page() -> Result<()> {
        let buffer_pool = create_test_buffer_pool(10)?;

        let (page_id, mut guard) = buffer_pool.new_page()?;
        assert_eq!(page_id, PageId(0));

        guard[0] = 42;
        guard[1] = 43;
        drop(guard);

        let guard = buffer_pool.fetch_page(page_id)?;
        assert_eq!(guard[0], 42);
        assert_eq!(guard[1], 43);

        Ok(())
    }

    #[test]
    fn test_fetch_write() -> Result<()> {
        let buffer_pool = create_test_buffer_pool(10)?;

        let (page_id, mut guard) = buffer_pool.new_page()?;
        guard[0] = 10;
        drop(guard);

        let mut guard = buffer_pool.fetch_page_write(page_id)?;
        guard[0] = 20;
        drop(guard);

        let guard = buffer_pool.fetch_page(page_id)?;
        assert_eq!(guard[0], 20);

        Ok(())
    }

    #[test]
    fn test_eviction_persists_dirty_pages() -> Result<()> {
        let buffer_pool = create_test_buffer_pool(2)?;

        for i in 0..3u8 {
            let (page_id, mut guard) = buffer_pool.new_page()?;
            assert_eq!(page_id.0, i as u32);
            guard[0] = i + 1;
        }

        // Page 0 was evicted to make room; its bytes must come back from disk.
        let guard = buffer_pool.fetch_page(PageId(0))?;
        assert_eq!(guard[0], 1);
        drop(guard);

        let guard = buffer_pool.fetch_page(PageId(1))?;
        assert_eq!(guard[0], 2);

        Ok(())
    }

    #[test]
    fn test_pinned_pages_are_not_evicted() -> Result<()> {
        let buffer_pool = create_test_buffer_pool(2)?;

        let (page_id1, mut guard1) = buffer_pool.new_page()?;
        guard1[0] = 1;
        drop(guard1);

        // Keep page 2 pinned while page 3 forces an eviction.
        let (_page_id2, guard2) = buffer_pool.new_page()?;
        let (_page_id3, mut guard3) = buffer_pool.new_page()?;
        guard3[0] = 3;
        drop(guard3);
        drop(guard2);

        let g1 = buffer_pool.fetch_page(page_id1)?;
        assert_eq!(g1[0], 1);

        Ok(())
    }

    #[test]
    fn test_exhaustion_errors() -> Result<()> {
        let buffer_pool = create_test_buffer_pool(2)?;

        let (_id1, _g1) = buffer_pool.new_page()?;
        let (_id2, _g2) = buffer_pool.new_page()?;

        // Both frames pinned: the third allocation has nowhere to go.
        assert!(buffer_pool.new_page().is_err());

        Ok(())
    }

    #[test]
    fn test_delete_page() -> Result<()> {
        let buffer_pool = create_test_buffer_pool(4)?;

        let (page_id, guard) = buffer_pool.new_page()?;
        assert!(buffer_pool.delete_page(page_id).is_err()); // still pinned
        drop(guard);

        buffer_pool.delete_page(page_id)?;

        // The freed slot is handed out again.
        let (reused, _guard) = buffer_pool.new_page()?;
        assert_eq!(reused, page_id);

        Ok(())
    }

    #[test]
    fn test_flush() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let page_manager = PageManager::create(&file_path)?;
        let replacer = Box::new(lru::LruReplacer::new());
        let buffer_pool = BufferPoolManager::new(page_manager, replacer, 10);

        let (page_id, mut guard) = buffer_pool.new_page()?;
        guard[0] = 99;
        drop(guard);

        buffer_pool.flush_page(page_id)?;

        // A fresh manager over the same file sees the flushed bytes.
        let mut pm = PageManager::open(&file_path)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        pm.read_page(page_id, &mut buf)?;
        assert_eq!(buf[0], 99);

        Ok(())
    }
}
