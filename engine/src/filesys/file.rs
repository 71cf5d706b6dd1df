//! JSON record files

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::EngineError;

/// A record file on disk
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, EngineError> {
        let bytes = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Parse the file as JSON, `None` when it does not exist
    pub async fn read_json_opt<T: DeserializeOwned>(&self) -> Result<Option<T>, EngineError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the file with `value`; readers see the old or the new record
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), EngineError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Write `value` to a file that must not exist yet
    ///
    /// Fails with `ErrorKind::AlreadyExists` rather than overwrite.
    pub async fn write_json_new<T: Serialize>(&self, value: &T) -> Result<(), EngineError> {
        self.ensure_parent().await?;
        let contents = serde_json::to_vec_pretty(value)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Remove the file; a missing file is not an error
    pub async fn delete(&self) -> Result<(), EngineError> {
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Write through a sibling temp file and rename over the target
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), EngineError> {
        self.ensure_parent().await?;
        let staging = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&staging).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&staging, &self.path).await?;
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), EngineError> {
        match self.path.parent() {
            Some(parent) => Ok(fs::create_dir_all(parent).await?),
            None => Ok(()),
        }
    }
}
