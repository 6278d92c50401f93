//! Durable key/value store shared by all contexts.
//!
//! The store is the only place where contexts agree on facts. Two keys
//! matter to the upload protocol:
//!
//! | Key | Value | Written by |
//! |-----|-------|------------|
//! | `fileToUpload` | [`PendingTransfer`] as JSON | uploader on network failure |
//! | `heartBeat` | `true` / `false` | uploader on probe, supervisor on ack/reset |
//!
//! Backends implement [`DurableStore`] over raw bytes; [`TransferStore`]
//! wraps one with the typed accessors the components use.

mod file;

pub use file::FileStore;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::file::FilePayload;
use crate::{LIVENESS_KEY, PENDING_TRANSFER_KEY};

/// Persistent key/value storage surviving context restarts.
///
/// Every call suspends the calling task until the operation completes.
/// Individual reads and writes are atomic; there are no transactions.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be reached.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store cannot be reached.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process store backed by a map.
///
/// Useful for tests and for running all contexts inside one process. It can
/// be switched unavailable to simulate an outage.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store switched off".into()))
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check_available()?;
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries()?.remove(key);
        Ok(())
    }
}

/// A transfer persisted for later resumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    /// The full payload of the failed attempt
    pub file: FilePayload,
    /// When the payload was persisted
    pub stored_at: DateTime<Utc>,
    /// Bus id of the uploader that persisted the payload, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
}

impl PendingTransfer {
    /// Wrap a payload, stamping it with the current time.
    #[must_use]
    pub fn new(file: FilePayload) -> Self {
        Self {
            file,
            stored_at: Utc::now(),
            owner: None,
        }
    }

    /// Whether the uploader with bus id `id` should resume this entry
    /// without waiting for anyone else.
    #[must_use]
    pub fn is_owned_by(&self, id: Uuid) -> bool {
        self.owner.is_none_or(|owner| owner == id)
    }
}

/// Typed access to the protocol keys of a [`DurableStore`].
#[derive(Clone)]
pub struct TransferStore {
    inner: Arc<dyn DurableStore>,
}

impl std::fmt::Debug for TransferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStore").finish_non_exhaustive()
    }
}

impl TransferStore {
    /// Wrap a store backend.
    pub fn new(inner: Arc<dyn DurableStore>) -> Self {
        Self { inner }
    }

    /// Convenience constructor for an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Read the pending transfer, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the entry is corrupt.
    pub async fn pending_transfer(&self) -> Result<Option<PendingTransfer>> {
        let Some(raw) = self.inner.get(PENDING_TRANSFER_KEY).await? else {
            return Ok(None);
        };

        let pending: PendingTransfer = serde_json::from_slice(&raw).map_err(|e| {
            Error::Serialization(format!("Failed to parse pending transfer: {e}"))
        })?;
        Ok(Some(pending))
    }

    /// Persist a payload as the pending transfer, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn save_pending_transfer(&self, file: &FilePayload) -> Result<PendingTransfer> {
        self.write_pending(PendingTransfer::new(file.clone())).await
    }

    /// Persist a payload on behalf of the uploader with bus id `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn save_owned_pending_transfer(
        &self,
        file: &FilePayload,
        owner: Uuid,
    ) -> Result<PendingTransfer> {
        let mut pending = PendingTransfer::new(file.clone());
        pending.owner = Some(owner);
        self.write_pending(pending).await
    }

    async fn write_pending(&self, pending: PendingTransfer) -> Result<PendingTransfer> {
        let json = serde_json::to_vec(&pending).map_err(|e| {
            Error::Serialization(format!("Failed to serialize pending transfer: {e}"))
        })?;

        self.inner.set(PENDING_TRANSFER_KEY, &json).await?;

        tracing::debug!(
            file_name = %pending.file.name,
            size = pending.file.data.len(),
            owner = ?pending.owner,
            "Saved pending transfer"
        );
        Ok(pending)
    }

    /// Delete the pending transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn clear_pending_transfer(&self) -> Result<()> {
        self.inner.delete(PENDING_TRANSFER_KEY).await?;
        tracing::debug!("Cleared pending transfer");
        Ok(())
    }

    /// Read the liveness flag. `None` means it was never set.
    ///
    /// A value that is not a boolean reads as `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn liveness(&self) -> Result<Option<bool>> {
        let raw = self.inner.get(LIVENESS_KEY).await?;
        Ok(raw.map(|bytes| serde_json::from_slice::<bool>(&bytes).unwrap_or(false)))
    }

    /// Write the liveness flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn set_liveness(&self, alive: bool) -> Result<()> {
        let raw = if alive { b"true".as_slice() } else { b"false".as_slice() };
        self.inner.set(LIVENESS_KEY, raw).await?;
        tracing::trace!(alive, "Liveness flag written");
        Ok(())
    }

    /// Remove the liveness flag entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn clear_liveness(&self) -> Result<()> {
        self.inner.delete(LIVENESS_KEY).await
    }
}
