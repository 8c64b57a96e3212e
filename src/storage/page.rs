use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::PageId;
use crate::error::Result;

/// A fixed-size page frame.
///
/// Bytes are only reachable through the read and write latches. A write
/// latch is released with [`PageWriteGuard::release`], which records whether
/// the frame has to be written back.
#[derive(Debug)]
pub struct Page {
    id: PageId,
    data: RwLock<Vec<u8>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn zeroed(id: PageId, size: usize) -> Self {
        Self::from_bytes(id, vec![0u8; size])
    }

    pub fn from_bytes(id: PageId, data: Vec<u8>) -> Self {
        Self {
            id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Vec<u8>>> {
        Ok(self.data.read()?)
    }

    pub fn write(&self) -> Result<PageWriteGuard<'_>> {
        Ok(PageWriteGuard {
            guard: self.data.write()?,
            dirty: &self.dirty,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clears the dirty flag, returning whether it was set.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn into_bytes(self) -> Result<Vec<u8>> {
        Ok(self.data.into_inner()?)
    }
}

/// Write latch over a page's bytes.
pub struct PageWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, Vec<u8>>,
    dirty: &'a AtomicBool,
}

impl PageWriteGuard<'_> {
    /// Releases the latch. `mark_dirty` schedules the page for write-back.
    pub fn release(self, mark_dirty: bool) {
        if mark_dirty {
            self.dirty.store(true, Ordering::Release);
        }
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_latch_marks_dirty() {
        let page = Page::zeroed(PageId::new(1, 0), 16);
        let mut guard = page.write().unwrap();
        guard[0] = 7;
        guard.release(true);

        assert!(page.is_dirty());
        assert_eq!(page.read().unwrap()[0], 7);
        assert!(page.take_dirty());
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_clean_release() {
        let page = Page::zeroed(PageId::new(1, 3), 8);
        page.write().unwrap().release(false);
        assert!(!page.is_dirty());
        assert_eq!(page.into_bytes().unwrap(), vec![0u8; 8]);
    }
}
