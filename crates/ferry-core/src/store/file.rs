//! File-backed durable store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

use super::DurableStore;

/// File extension for store entries.
pub const ENTRY_EXTENSION: &str = "ferry";

/// Store keeping one file per key in a directory.
///
/// Entries live in platform-specific directories by default:
/// - Linux: `~/.local/share/ferry/store/`
/// - macOS: `~/Library/Application Support/Ferry/store/`
/// - Windows: `%APPDATA%\Ferry\store\`
///
/// Writes go to a temporary file that is synced and renamed over the entry,
/// so a reader never observes a half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open the store in the default platform-specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open_default() -> Result<Self> {
        Self::open(Self::default_dir()).await
    }

    /// Open the store in a custom directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::StoreUnavailable(format!(
                "Failed to create store directory {}: {e}",
                dir.display()
            ))
        })?;

        Ok(Self { dir })
    }

    /// Get the default platform-specific store directory.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        let data_dir = directories::ProjectDirs::from("com", "ferry", "Ferry").map_or_else(
            || PathBuf::from(".ferry"),
            |dirs| dirs.data_dir().to_path_buf(),
        );

        data_dir.join("store")
    }

    /// Get the store directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::Internal(format!("invalid store key: {key:?}")));
        }

        Ok(self.dir.join(format!("{key}.{ENTRY_EXTENSION}")))
    }
}

fn unavailable(action: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::StoreUnavailable(format!("Failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key)?;

        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable("read", &path, &e)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_path(key)?;
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| unavailable("create", &temp_path, &e))?;
        file.write_all(value)
            .await
            .map_err(|e| unavailable("write", &temp_path, &e))?;
        file.sync_all()
            .await
            .map_err(|e| unavailable("sync", &temp_path, &e))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| unavailable("replace", &path, &e))?;

        tracing::trace!(key, path = %path.display(), size = value.len(), "Stored entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::trace!(key, path = %path.display(), "Deleted entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable("delete", &path, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FilePayload;
    use crate::store::TransferStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_set_get_delete() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = FileStore::open(temp_dir.path().join("store"))
            .await
            .expect("open store");

        assert!(store.get("heartBeat").await.expect("get").is_none());

        store.set("heartBeat", b"true").await.expect("set");
        assert_eq!(
            store.get("heartBeat").await.expect("get").as_deref(),
            Some(b"true".as_slice())
        );

        store.delete("heartBeat").await.expect("delete");
        assert!(store.get("heartBeat").await.expect("get").is_none());

        // Deleting twice is fine.
        store.delete("heartBeat").await.expect("delete again");
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let dir = temp_dir.path().to_path_buf();
        let payload = FilePayload::new("video.mp4", vec![7u8; 4096]);

        {
            let store = TransferStore::new(Arc::new(FileStore::open(dir.clone()).await.unwrap()));
            store.save_pending_transfer(&payload).await.expect("save");
        }

        let reopened = TransferStore::new(Arc::new(FileStore::open(dir).await.unwrap()));
        let pending = reopened
            .pending_transfer()
            .await
            .expect("load")
            .expect("pending should survive reopen");
        assert_eq!(pending.file, payload);
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_files() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = FileStore::open(temp_dir.path().to_path_buf())
            .await
            .expect("open store");

        store.set("fileToUpload", b"{}").await.expect("set");

        let names: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["fileToUpload.ferry".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = FileStore::open(temp_dir.path().to_path_buf())
            .await
            .expect("open store");

        assert!(store.set("../escape", b"x").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
