//! File-per-key store.
//!
//! Each value lives at `root/abc/def/<sha256>.cache`, where `abc` and `def`
//! are the first two triples of the key's hex digest. Writes land in a
//! sibling temp file and are renamed into place, so readers never see a
//! partial value.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::KeyValueStore;
use super::hash::compute_storage_key;
use crate::Error;

const FILE_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;

/// Temp-file sequence shared by every `FileStore` in the process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Directory-backed store with one file per key.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    forever: bool,
}

impl FileStore {
    /// Store values under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), forever: false }
    }

    /// Keep values forever: `delete` becomes a no-op.
    pub fn forever(mut self, forever: bool) -> Self {
        self.forever = forever;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path holding the value for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let hashed = compute_storage_key(key);
        self.root
            .join(&hashed[0..3])
            .join(&hashed[3..6])
            .join(format!("{hashed}.cache"))
    }

    async fn create_dirs(dir: &Path) -> std::io::Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIR_MODE);
        builder.create(dir).await
    }

    async fn write_file(path: &Path, value: &[u8]) -> std::io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = options.open(path).await?;
        file.write_all(value).await?;
        file.sync_all().await
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            Self::create_dirs(parent).await?;
        }

        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let temp = path.with_extension(format!("{}.{seq}.tmp", std::process::id()));

        if let Err(e) = Self::write_file(&temp, &value).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&temp, &path).await?;

        tracing::trace!(key, path = %path.display(), bytes = value.len(), "stored value file");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        if self.forever {
            return Ok(());
        }
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
