use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::{FileId, FileMap, FileMapProvider, Page, PageId, PagedStore};
use crate::cache::Cache;
use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Paged store backed by one file per synopsis in a directory.
///
/// Reads go through an S3-FIFO cache of page frames. A frame released dirty
/// is written back when it is unpinned, so evicting a frame never needs I/O.
/// Confiscated pages bypass the cache and are written directly.
pub struct FileStore {
    dir: PathBuf,
    page_size: usize,
    map: FileMap,
    files: Mutex<HashMap<FileId, File>>,
    cache: Mutex<Cache<PageId, Arc<Page>>>,
}

impl FileStore {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if config.page_size == 0 {
            return Err(Error::InvalidOperation("page size must be positive".to_string()));
        }
        fs::create_dir_all(&config.dir)?;
        Ok(Self {
            dir: config.dir.clone(),
            page_size: config.page_size,
            map: FileMap::new(),
            files: Mutex::new(HashMap::new()),
            cache: Mutex::new(Cache::new(config.cache_pages)),
        })
    }

    /// (hits, misses) of the page cache.
    pub fn cache_stats(&self) -> Result<(usize, usize)> {
        Ok(self.cache.lock()?.stats())
    }

    fn offset(&self, page: u32) -> u64 {
        page as u64 * self.page_size as u64
    }

    fn read_page(&self, id: PageId) -> Result<Vec<u8>> {
        let files = self.files.lock()?;
        let mut file = files.get(&id.file).ok_or_else(|| closed(id.file))?;
        let mut buf = vec![0u8; self.page_size];
        file.seek(SeekFrom::Start(self.offset(id.page)))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| Error::PageIo("read page", e))?;
        Ok(buf)
    }

    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        let files = self.files.lock()?;
        let mut file = files.get(&id.file).ok_or_else(|| closed(id.file))?;
        file.seek(SeekFrom::Start(self.offset(id.page)))
            .and_then(|_| file.write_all(data))
            .map_err(|e| Error::PageIo("write page", e))
    }

    fn purge(&self, file: FileId) -> Result<()> {
        self.cache.lock()?.retain(|id| id.file != file);
        Ok(())
    }
}

fn closed(file: FileId) -> Error {
    Error::InvalidState(format!("file {} is not open", file))
}

impl FileMapProvider for FileStore {
    fn lookup_file_id(&self, name: &str) -> Option<FileId> {
        self.map.lookup_file_id(name)
    }

    fn lookup_file_name(&self, id: FileId) -> Option<String> {
        self.map.lookup_file_name(id)
    }
}

impl PagedStore for FileStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_file(&self, name: &str) -> Result<FileId> {
        let path = self.dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let id = self.map.register(name)?;
        self.files.lock()?.insert(id, file);
        tracing::debug!(file = name, file_id = id, "Created synopsis file");
        Ok(id)
    }

    fn open_file(&self, name: &str) -> Result<FileId> {
        let id = self.map.register(name)?;
        let mut files = self.files.lock()?;
        if !files.contains_key(&id) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(self.dir.join(name))?;
            files.insert(id, file);
        }
        Ok(id)
    }

    fn close_file(&self, file: FileId) -> Result<()> {
        self.purge(file)?;
        if let Some(handle) = self.files.lock()?.remove(&file) {
            handle.sync_all()?;
        }
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        if let Some(id) = self.map.unregister(name)? {
            self.purge(id)?;
            self.files.lock()?.remove(&id);
        }
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(file = name, "Deleted synopsis file");
        Ok(())
    }

    fn num_pages(&self, file: FileId) -> Result<u32> {
        let files = self.files.lock()?;
        let handle = files.get(&file).ok_or_else(|| closed(file))?;
        let len = handle.metadata()?.len();
        Ok(len.div_ceil(self.page_size as u64) as u32)
    }

    fn pin(&self, id: PageId, new: bool) -> Result<Arc<Page>> {
        let mut cache = self.cache.lock()?;
        if let Some(page) = cache.get(&id) {
            return Ok(page.clone());
        }
        let page = if new {
            if !self.files.lock()?.contains_key(&id.file) {
                return Err(closed(id.file));
            }
            Page::zeroed(id, self.page_size)
        } else {
            Page::from_bytes(id, self.read_page(id)?)
        };
        let page = Arc::new(page);
        cache.insert(id, page.clone());
        Ok(page)
    }

    fn unpin(&self, page: Arc<Page>) -> Result<()> {
        if page.take_dirty() {
            let data = page.read()?;
            self.write_page(page.id(), &data)?;
        }
        Ok(())
    }

    fn confiscate(&self, id: PageId) -> Result<Page> {
        if !self.files.lock()?.contains_key(&id.file) {
            return Err(closed(id.file));
        }
        Ok(Page::zeroed(id, self.page_size))
    }

    fn return_page(&self, page: Page) {
        drop(page);
    }

    fn write_confiscated(&self, page: Page) -> Result<()> {
        let id = page.id();
        self.cache.lock()?.remove(&id);
        let data = page.into_bytes()?;
        self.write_page(id, &data)
    }

    fn sync(&self, file: FileId) -> Result<()> {
        let files = self.files.lock()?;
        let handle = files.get(&file).ok_or_else(|| closed(file))?;
        handle.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir, cache_pages: usize) -> FileStore {
        let config = StoreConfig::new(dir.path()).page_size(64).cache_pages(cache_pages);
        FileStore::open(&config).unwrap()
    }

    #[test]
    fn test_dirty_page_written_on_unpin() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 4);
        let file = store.create_file("wavelet.stats").unwrap();

        let page = store.pin(PageId::new(file, 0), true).unwrap();
        let mut guard = page.write().unwrap();
        guard[..4].copy_from_slice(b"meta");
        guard.release(true);
        store.unpin(page).unwrap();
        assert_eq!(store.num_pages(file).unwrap(), 1);

        // reopen so the page comes from disk instead of the cache
        store.close_file(file).unwrap();
        let file = store.open_file("wavelet.stats").unwrap();
        let page = store.pin(PageId::new(file, 0), false).unwrap();
        assert_eq!(&page.read().unwrap()[..4], b"meta");
    }

    #[test]
    fn test_clean_page_not_written() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 4);
        let file = store.create_file("clean").unwrap();

        let page = store.pin(PageId::new(file, 0), true).unwrap();
        page.write().unwrap().release(false);
        store.unpin(page).unwrap();
        assert_eq!(store.num_pages(file).unwrap(), 0);
    }

    #[test]
    fn test_confiscated_write_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 4);
        let file = store.create_file("bloom").unwrap();

        let stale = store.pin(PageId::new(file, 1), true).unwrap();
        store.unpin(stale).unwrap();

        let page = store.confiscate(PageId::new(file, 1)).unwrap();
        page.write().unwrap()[0] = 0xAB;
        store.write_confiscated(page).unwrap();

        let page = store.pin(PageId::new(file, 1), false).unwrap();
        assert_eq!(page.read().unwrap()[0], 0xAB);
        assert_eq!(store.num_pages(file).unwrap(), 2);
    }

    #[test]
    fn test_reads_through_small_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 2);
        let file = store.create_file("many").unwrap();

        for n in 0..6u32 {
            let page = store.pin(PageId::new(file, n), true).unwrap();
            let mut guard = page.write().unwrap();
            guard[0] = n as u8;
            guard.release(true);
            store.unpin(page).unwrap();
        }
        for n in 0..6u32 {
            let page = store.pin(PageId::new(file, n), false).unwrap();
            assert_eq!(page.read().unwrap()[0], n as u8);
            store.unpin(page).unwrap();
        }
        let (_, misses) = store.cache_stats().unwrap();
        assert!(misses > 0);
    }

    #[test]
    fn test_delete_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 4);
        store.create_file("doomed").unwrap();
        assert!(store.create_file("doomed").is_err());

        store.delete_file("doomed").unwrap();
        assert!(!dir.path().join("doomed").exists());
        assert!(store.open_file("doomed").is_err());
    }
}
