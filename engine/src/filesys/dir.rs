//! Directories holding record files

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::EngineError;
use crate::filesys::file::File;

#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory and any missing parents
    pub async fn create(&self) -> Result<(), EngineError> {
        Ok(fs::create_dir_all(&self.path).await?)
    }

    /// Files ending in `.<ext>`, sorted by path
    ///
    /// A directory that does not exist yet has no files.
    pub async fn list_files_with_ext(&self, ext: &str) -> Result<Vec<PathBuf>, EngineError> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == ext) && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Fresh uniquely named directory under the system temp dir
    pub async fn create_temp_dir(prefix: &str) -> Result<Dir, EngineError> {
        let dir = Dir::new(std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4())));
        dir.create().await?;
        Ok(dir)
    }
}
