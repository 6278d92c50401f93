//! Recovery trigger registration.
//!
//! A recovery trigger is a wakeup, scoped to a tag, that runs supervisor
//! logic later even if every other context is gone. Registration goes
//! through a [`RecoveryScheduler`], which may refuse. A [`Registrar`] keeps
//! retrying refused registrations with a fixed backoff until one succeeds or
//! it is cancelled.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Platform facility that fires a tag at some later point.
#[async_trait]
pub trait RecoveryScheduler: Send + Sync {
    /// Ask for `tag` to be fired later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistrationRejected`] if the platform refuses.
    async fn register(&self, tag: &str) -> Result<()>;
}

/// Receiving side of fired recovery triggers.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

impl TriggerReceiver {
    /// Wait for the next fired tag. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// In-process scheduler firing each registered tag once after a delay.
///
/// Registering a tag that is already waiting to fire is coalesced into the
/// pending wakeup.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    delay: Duration,
    tx: mpsc::UnboundedSender<String>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl LocalScheduler {
    /// Create a scheduler and the receiver its triggers fire on.
    #[must_use]
    pub fn new(delay: Duration) -> (Self, TriggerReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            delay,
            tx,
            pending: Arc::new(Mutex::new(HashSet::new())),
        };
        (scheduler, TriggerReceiver { rx })
    }

    /// Fire `tag` right away, bypassing registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextTerminated`] if the receiver is gone.
    pub fn fire_now(&self, tag: &str) -> Result<()> {
        tracing::debug!(tag, "Firing recovery trigger");
        self.tx
            .send(tag.to_string())
            .map_err(|_| Error::ContextTerminated)
    }

    /// Whether `tag` is registered and waiting to fire.
    #[must_use]
    pub fn is_pending(&self, tag: &str) -> bool {
        self.pending.lock().is_ok_and(|pending| pending.contains(tag))
    }
}

#[async_trait]
impl RecoveryScheduler for LocalScheduler {
    async fn register(&self, tag: &str) -> Result<()> {
        if self.tx.is_closed() {
            return Err(Error::RegistrationRejected(
                "trigger receiver is gone".to_string(),
            ));
        }

        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| Error::Internal("scheduler lock poisoned".into()))?;
            if !pending.insert(tag.to_string()) {
                tracing::debug!(tag, "Recovery trigger already pending");
                return Ok(());
            }
        }

        let tag = tag.to_string();
        let delay = self.delay;
        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut pending) = pending.lock() {
                pending.remove(&tag);
            }
            tracing::debug!(tag = %tag, "Recovery trigger fired");
            let _ = tx.send(tag);
        });

        Ok(())
    }
}

/// Registers recovery triggers, retrying refusals with a fixed backoff.
///
/// Only one retry loop runs per tag; further requests for a tag whose loop is
/// still running are dropped. Every loop stops when the cancellation token
/// fires.
#[derive(Clone)]
pub struct Registrar {
    scheduler: Arc<dyn RecoveryScheduler>,
    backoff: Duration,
    active: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Registrar {
    /// Create a registrar over `scheduler`.
    pub fn new(
        scheduler: Arc<dyn RecoveryScheduler>,
        backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            backoff,
            active: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        }
    }

    /// Start registering `tag` in the background.
    ///
    /// Returns the loop's handle, or `None` when a loop for `tag` is already
    /// running.
    pub fn request(&self, tag: &str) -> Option<tokio::task::JoinHandle<()>> {
        {
            let mut active = self.active.lock().ok()?;
            if !active.insert(tag.to_string()) {
                tracing::debug!(tag, "Registration already in progress");
                return None;
            }
        }

        let registrar = self.clone();
        let tag = tag.to_string();
        Some(tokio::spawn(async move {
            registrar.register_until_accepted(&tag).await;
            if let Ok(mut active) = registrar.active.lock() {
                active.remove(&tag);
            }
        }))
    }

    async fn register_until_accepted(&self, tag: &str) {
        let mut attempt: u32 = 1;
        loop {
            match self.scheduler.register(tag).await {
                Ok(()) => {
                    tracing::info!(tag, attempt, "Recovery trigger registered");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        tag,
                        attempt,
                        error = %e,
                        retry_in = ?self.backoff,
                        "Recovery trigger registration failed"
                    );
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.backoff) => {}
                () = self.cancel.cancelled() => {
                    tracing::debug!(tag, "Registration loop cancelled");
                    return;
                }
            }
            attempt += 1;
        }
    }
}
