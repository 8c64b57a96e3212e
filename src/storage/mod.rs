//! Paged storage consumed by the synopses.
//!
//! Synopses never touch files directly. They address fixed-size pages by
//! `(file, page)` and go through a [`PagedStore`]:
//!
//! ```text
//!   pin(id) ──► latch (read | write) ──► touch bytes ──► release ──► unpin
//!
//!   confiscate(id) ──► fill ──► write_confiscated      (bulk load)
//!                          └──► return_page            (abort)
//! ```
//!
//! Page 0 of every synopsis file is its metadata page.

mod file;
mod lifecycle;
mod memory;
mod page;

pub use file::FileStore;
pub use lifecycle::{FileHandle, SynopsisFile};
pub use memory::MemoryStore;
pub use page::{Page, PageWriteGuard};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

pub type FileId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub file: FileId,
    pub page: u32,
}

impl PageId {
    pub fn new(file: FileId, page: u32) -> Self {
        Self { file, page }
    }
}

/// Maps logical file names to the numeric ids pages are addressed by.
pub trait FileMapProvider {
    fn lookup_file_id(&self, name: &str) -> Option<FileId>;
    fn lookup_file_name(&self, id: FileId) -> Option<String>;
}

/// Fixed-size page cache keyed by `(file, page)`.
pub trait PagedStore: FileMapProvider + Send + Sync {
    fn page_size(&self) -> usize;

    /// Creates and registers a new, empty file.
    fn create_file(&self, name: &str) -> Result<FileId>;
    /// Opens a previously created file.
    fn open_file(&self, name: &str) -> Result<FileId>;
    fn close_file(&self, file: FileId) -> Result<()>;
    fn delete_file(&self, name: &str) -> Result<()>;
    fn num_pages(&self, file: FileId) -> Result<u32>;

    /// Pins a page. `new` pages start zeroed instead of being read.
    fn pin(&self, id: PageId, new: bool) -> Result<Arc<Page>>;
    /// Unpins a page, writing it back if it was released dirty.
    fn unpin(&self, page: Arc<Page>) -> Result<()>;

    /// Hands out a zeroed page outside the cache for bulk loading.
    fn confiscate(&self, id: PageId) -> Result<Page>;
    /// Gives a confiscated page back without persisting it.
    fn return_page(&self, page: Page);
    /// Persists a confiscated page.
    fn write_confiscated(&self, page: Page) -> Result<()>;

    fn sync(&self, file: FileId) -> Result<()>;
}

/// Name to id registry shared by the store implementations.
#[derive(Debug, Default)]
pub struct FileMap {
    inner: Mutex<FileMapInner>,
}

#[derive(Debug, Default)]
struct FileMapInner {
    by_name: HashMap<String, FileId>,
    by_id: HashMap<FileId, String>,
    next_id: FileId,
}

impl FileMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, or returns its existing id.
    pub fn register(&self, name: &str) -> Result<FileId> {
        let mut inner = self.inner.lock()?;
        if let Some(id) = inner.by_name.get(name) {
            return Ok(*id);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(id, name.to_string());
        Ok(id)
    }

    pub fn unregister(&self, name: &str) -> Result<Option<FileId>> {
        let mut inner = self.inner.lock()?;
        let id = inner.by_name.remove(name);
        if let Some(id) = id {
            inner.by_id.remove(&id);
        }
        Ok(id)
    }

    pub fn require(&self, name: &str) -> Result<FileId> {
        self.lookup_file_id(name)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown file {}", name)))
    }
}

impl FileMapProvider for FileMap {
    fn lookup_file_id(&self, name: &str) -> Option<FileId> {
        self.inner.lock().ok()?.by_name.get(name).copied()
    }

    fn lookup_file_name(&self, id: FileId) -> Option<String> {
        self.inner.lock().ok()?.by_id.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_map_register_lookup() {
        let map = FileMap::new();
        let a = map.register("a.wavelet").unwrap();
        let b = map.register("b.bloom").unwrap();
        assert_ne!(a, b);
        assert_eq!(map.register("a.wavelet").unwrap(), a);
        assert_eq!(map.lookup_file_id("b.bloom"), Some(b));
        assert_eq!(map.lookup_file_name(a).as_deref(), Some("a.wavelet"));
    }

    #[test]
    fn test_file_map_unregister() {
        let map = FileMap::new();
        let id = map.register("gone").unwrap();
        assert_eq!(map.unregister("gone").unwrap(), Some(id));
        assert_eq!(map.lookup_file_id("gone"), None);
        assert_eq!(map.lookup_file_name(id), None);
        assert!(map.require("gone").is_err());
    }
}
