use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use shared::types::Directory;

#[derive(Debug, Error)]
pub enum CacheError {
    /// No discovery has been run yet
    #[error("no products cached at {}; run find-products first", .0.display())]
    NotCached(PathBuf),

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The discovery cache: a single JSON file mapping jid to device record.
/// Every save replaces the whole file.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    path: PathBuf,
}

impl DirectoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Directory, CacheError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::NotCached(self.path.clone()));
            }
            Err(source) => {
                return Err(CacheError::Io { path: self.path.clone(), source });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, directory: &Directory) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io { path: self.path.clone(), source };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec(directory).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })?;

        // Write beside the target and rename so readers never see a partial file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;

        tracing::debug!("Saved {} product(s) to {}", directory.len(), self.path.display());
        Ok(())
    }
}
