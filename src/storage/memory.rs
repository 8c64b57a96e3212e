use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use super::{FileId, FileMap, FileMapProvider, Page, PageId, PagedStore};
use crate::error::{Error, Result};

struct MemFile {
    pages: Vec<Arc<Page>>,
    open: bool,
}

/// Paged store kept entirely in memory.
///
/// Pinned pages are the stored frames themselves, so writes are visible to
/// every later pin without a write-back step.
pub struct MemoryStore {
    page_size: usize,
    map: FileMap,
    files: Mutex<HashMap<FileId, MemFile>>,
}

impl MemoryStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            map: FileMap::new(),
            files: Mutex::new(HashMap::new()),
        }
    }

    fn with_open_file<T>(&self, file: FileId, f: impl FnOnce(&mut MemFile) -> Result<T>) -> Result<T> {
        let mut files = self.files.lock()?;
        match files.get_mut(&file) {
            Some(mem) if mem.open => f(mem),
            Some(_) => Err(Error::InvalidState(format!("file {} is closed", file))),
            None => Err(Error::InvalidOperation(format!("unknown file id {}", file))),
        }
    }

    fn place(&self, mem: &mut MemFile, page: Arc<Page>) {
        let index = page.id().page as usize;
        while mem.pages.len() < index {
            let filler = PageId::new(page.id().file, mem.pages.len() as u32);
            mem.pages.push(Arc::new(Page::zeroed(filler, self.page_size)));
        }
        if index < mem.pages.len() {
            mem.pages[index] = page;
        } else {
            mem.pages.push(page);
        }
    }
}

impl FileMapProvider for MemoryStore {
    fn lookup_file_id(&self, name: &str) -> Option<FileId> {
        self.map.lookup_file_id(name)
    }

    fn lookup_file_name(&self, id: FileId) -> Option<String> {
        self.map.lookup_file_name(id)
    }
}

impl PagedStore for MemoryStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_file(&self, name: &str) -> Result<FileId> {
        let mut files = self.files.lock()?;
        if let Some(id) = self.map.lookup_file_id(name) {
            if files.contains_key(&id) {
                return Err(Error::InvalidOperation(format!("file {} already exists", name)));
            }
        }
        let id = self.map.register(name)?;
        files.insert(
            id,
            MemFile {
                pages: Vec::new(),
                open: true,
            },
        );
        Ok(id)
    }

    fn open_file(&self, name: &str) -> Result<FileId> {
        let id = self.map.require(name)?;
        let mut files = self.files.lock()?;
        let mem = files
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown file {}", name)))?;
        mem.open = true;
        Ok(id)
    }

    fn close_file(&self, file: FileId) -> Result<()> {
        if let Some(mem) = self.files.lock()?.get_mut(&file) {
            mem.open = false;
        }
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        if let Some(id) = self.map.unregister(name)? {
            self.files.lock()?.remove(&id);
        }
        Ok(())
    }

    fn num_pages(&self, file: FileId) -> Result<u32> {
        self.with_open_file(file, |mem| Ok(mem.pages.len() as u32))
    }

    fn pin(&self, id: PageId, new: bool) -> Result<Arc<Page>> {
        self.with_open_file(id.file, |mem| {
            if let Some(page) = mem.pages.get(id.page as usize) {
                return Ok(page.clone());
            }
            if !new {
                return Err(Error::PageIo(
                    "pin",
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("page {} of file {} does not exist", id.page, id.file),
                    ),
                ));
            }
            let page = Arc::new(Page::zeroed(id, self.page_size));
            self.place(mem, page.clone());
            Ok(page)
        })
    }

    fn unpin(&self, page: Arc<Page>) -> Result<()> {
        page.take_dirty();
        Ok(())
    }

    fn confiscate(&self, id: PageId) -> Result<Page> {
        self.with_open_file(id.file, |_| Ok(Page::zeroed(id, self.page_size)))
    }

    fn return_page(&self, page: Page) {
        drop(page);
    }

    fn write_confiscated(&self, page: Page) -> Result<()> {
        let file = page.id().file;
        self.with_open_file(file, |mem| {
            self.place(mem, Arc::new(page));
            Ok(())
        })
    }

    fn sync(&self, _file: FileId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_new_and_existing() {
        let store = MemoryStore::new(32);
        let file = store.create_file("stats").unwrap();

        let page = store.pin(PageId::new(file, 2), true).unwrap();
        let mut guard = page.write().unwrap();
        guard[0] = 9;
        guard.release(true);
        store.unpin(page).unwrap();

        // page 2 pulled in zeroed fillers for 0 and 1
        assert_eq!(store.num_pages(file).unwrap(), 3);
        let again = store.pin(PageId::new(file, 2), false).unwrap();
        assert_eq!(again.read().unwrap()[0], 9);
        assert!(store.pin(PageId::new(file, 5), false).is_err());
    }

    #[test]
    fn test_confiscated_pages() {
        let store = MemoryStore::new(16);
        let file = store.create_file("bloom").unwrap();

        let kept = store.confiscate(PageId::new(file, 1)).unwrap();
        kept.write().unwrap()[3] = 0xFF;
        let dropped = store.confiscate(PageId::new(file, 2)).unwrap();

        store.write_confiscated(kept).unwrap();
        store.return_page(dropped);

        assert_eq!(store.num_pages(file).unwrap(), 2);
        let page = store.pin(PageId::new(file, 1), false).unwrap();
        assert_eq!(page.read().unwrap()[3], 0xFF);
    }

    #[test]
    fn test_file_lifecycle() {
        let store = MemoryStore::new(16);
        let file = store.create_file("c").unwrap();
        assert!(store.create_file("c").is_err());

        store.close_file(file).unwrap();
        assert!(matches!(
            store.pin(PageId::new(file, 0), true),
            Err(Error::InvalidState(_))
        ));

        assert_eq!(store.open_file("c").unwrap(), file);
        store.delete_file("c").unwrap();
        assert!(store.open_file("c").is_err());
    }
}
