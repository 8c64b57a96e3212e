use std::sync::Arc;

use super::{FileId, PageId, PagedStore};
use crate::error::{Error, Result};
use crate::persist::SynopsisMeta;

/// An activated synopsis file: the store plus the id its pages live under.
#[derive(Clone)]
pub struct FileHandle {
    store: Arc<dyn PagedStore>,
    file: FileId,
    name: String,
}

impl FileHandle {
    pub fn store(&self) -> &dyn PagedStore {
        self.store.as_ref()
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_id(&self, page: u32) -> PageId {
        PageId::new(self.file, page)
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("file", &self.file)
            .field("name", &self.name)
            .finish()
    }
}

/// Life cycle of the file a synopsis is persisted in.
///
/// ```text
///   create ──► activate ◄──► deactivate ──► destroy
/// ```
///
/// `create` leaves a zeroed metadata page behind, which reads back as an
/// empty synopsis. Pages are only reachable while the file is activated.
pub struct SynopsisFile {
    store: Arc<dyn PagedStore>,
    name: String,
    file: Option<FileId>,
}

impl SynopsisFile {
    pub fn new(store: Arc<dyn PagedStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            file: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_activated(&self) -> bool {
        self.file.is_some()
    }

    pub fn create(&mut self) -> Result<()> {
        if self.is_activated() {
            return Err(Error::InvalidState(format!(
                "cannot create {} while it is activated",
                self.name
            )));
        }
        let file = self.store.create_file(&self.name)?;
        let handle = FileHandle {
            store: self.store.clone(),
            file,
            name: self.name.clone(),
        };
        SynopsisMeta::default().write(&handle)?;
        self.store.close_file(file)
    }

    pub fn activate(&mut self) -> Result<()> {
        if self.is_activated() {
            return Err(Error::InvalidState(format!(
                "{} is already activated",
                self.name
            )));
        }
        let file = self.store.open_file(&self.name)?;
        self.file = Some(file);
        tracing::debug!(file = %self.name, file_id = file, "Activated synopsis file");
        Ok(())
    }

    pub fn deactivate(&mut self) -> Result<()> {
        let file = self
            .file
            .ok_or_else(|| Error::NotActivated(self.name.clone()))?;
        self.store.sync(file)?;
        self.store.close_file(file)?;
        self.file = None;
        Ok(())
    }

    pub fn destroy(&mut self) -> Result<()> {
        if self.is_activated() {
            return Err(Error::InvalidState(format!(
                "cannot destroy {} while it is activated",
                self.name
            )));
        }
        self.store.delete_file(&self.name)
    }

    /// Handle for page access; fails unless the file is activated.
    pub fn handle(&self) -> Result<FileHandle> {
        let file = self
            .file
            .ok_or_else(|| Error::NotActivated(self.name.clone()))?;
        Ok(FileHandle {
            store: self.store.clone(),
            file,
            name: self.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn file(name: &str) -> SynopsisFile {
        SynopsisFile::new(Arc::new(MemoryStore::new(64)), name)
    }

    #[test]
    fn test_lifecycle() {
        let mut file = file("component-1.wavelet");
        file.create().unwrap();
        assert!(!file.is_activated());

        file.activate().unwrap();
        let handle = file.handle().unwrap();
        assert_eq!(SynopsisMeta::read(&handle).unwrap(), SynopsisMeta::default());

        file.deactivate().unwrap();
        file.destroy().unwrap();
        assert!(file.activate().is_err());
    }

    #[test]
    fn test_not_activated() {
        let mut file = file("idle");
        file.create().unwrap();
        assert!(matches!(file.handle(), Err(Error::NotActivated(_))));
        assert!(matches!(file.deactivate(), Err(Error::NotActivated(_))));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut file = file("busy");
        file.create().unwrap();
        file.activate().unwrap();
        assert!(matches!(file.activate(), Err(Error::InvalidState(_))));
        assert!(matches!(file.destroy(), Err(Error::InvalidState(_))));
        assert!(matches!(file.create(), Err(Error::InvalidState(_))));
    }
}
