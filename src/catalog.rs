use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::model::Catalog;

/// The catalog JSON file. One full rewrite per sync; a crash mid-write
/// leaves the previous file in place.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no catalog has been written yet.
    pub fn load(&self) -> Result<Option<Catalog>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No catalog at {}", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(SyncError::CatalogRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let catalog: Catalog = serde_json::from_str(&raw).map_err(|source| SyncError::CatalogParse {
            path: self.path.clone(),
            source,
        })?;
        debug!("Loaded {} images from {}", catalog.images.len(), self.path.display());
        Ok(Some(catalog))
    }

    pub fn save(&self, catalog: &Catalog) -> Result<()> {
        let fail = |message: String| SyncError::CatalogWrite {
            path: self.path.clone(),
            message,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
        }

        let mut file = AtomicWriteFile::options()
            .open(&self.path)
            .map_err(|e| fail(e.to_string()))?;
        {
            let mut writer = BufWriter::new(&mut file);
            serde_json::to_writer_pretty(&mut writer, catalog).map_err(|e| fail(e.to_string()))?;
            writer.flush().map_err(|e| fail(e.to_string()))?;
        }
        file.commit().map_err(|e| fail(e.to_string()))?;

        info!("Saved {} images to {}", catalog.images.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record;

    #[test]
    fn absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path().join("images.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = CatalogStore::new(&path).load().unwrap_err();
        assert!(matches!(err, SyncError::CatalogParse { .. }));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path().join("data").join("images.json"));
        let catalog = Catalog {
            images: vec![
                record("mobile_2_0", 2, "https://x/b.jpg", 800, 600, 2000),
                record("mobile_1_0", 1, "https://x/a.jpg", 1024, 768, 1000),
            ],
            last_sync: 2500,
        };
        store.save(&catalog).unwrap();
        assert_eq!(store.load().unwrap(), Some(catalog));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"messageId\": 2"));
        assert!(raw.contains("\"lastSync\": 2500"));
    }

    #[test]
    fn overwrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path().join("images.json"));
        store
            .save(&Catalog {
                images: vec![record("a", 1, "https://x/a.jpg", 800, 600, 1)],
                last_sync: 1,
            })
            .unwrap();
        store.save(&Catalog::default()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.images.is_empty());
    }
}
