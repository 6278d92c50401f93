//! User-facing driver.
//!
//! The controller holds no durable state and never retries. It starts a
//! fresh uploader for every file, terminating the previous one, and mirrors
//! what it hears on the bus into a [`ControllerView`] that a UI can render.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, BusEndpoint};
use crate::error::{Error, Result};
use crate::file::FilePayload;
use crate::protocol::TransferMessage;
use crate::uploader::{UploaderFactory, UploaderHandle, UploaderState};

/// What the user currently sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerView {
    /// File announced by the last `Ready`
    pub file_name: Option<String>,
    /// Last reported progress, in `[0, 1]`
    pub progress: f64,
    /// Last status text, verbatim
    pub status: Option<String>,
}

impl ControllerView {
    fn apply(&mut self, message: &TransferMessage) -> bool {
        match message {
            TransferMessage::Ready { file_name } => {
                self.file_name = Some(file_name.clone());
                self.progress = 0.0;
                self.status = None;
            }
            TransferMessage::Progress { fraction } => self.progress = *fraction,
            TransferMessage::Status { text, .. } => self.status = Some(text.clone()),
            TransferMessage::HeartbeatProbe
            | TransferMessage::HeartbeatAck
            | TransferMessage::ResumeCommand
            | TransferMessage::Terminate => return false,
        }
        true
    }
}

/// Starts uploads and reflects their progress.
pub struct Controller {
    bus: Bus,
    factory: UploaderFactory,
    current: Mutex<Option<UploaderHandle>>,
    view: watch::Receiver<ControllerView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("view", &*self.view.borrow())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Subscribe a controller to `bus`.
    #[must_use]
    pub fn new(bus: Bus, factory: UploaderFactory) -> Self {
        let endpoint = bus.endpoint("controller");
        let (view_tx, view) = watch::channel(ControllerView::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reflect(endpoint, view_tx, cancel.clone()));

        Self {
            bus,
            factory,
            current: Mutex::new(None),
            view,
            cancel,
            task,
        }
    }

    /// Start a new uploader and hand it `file`.
    ///
    /// The uploader started by the previous call is terminated first, so at
    /// most one uploader per controller is on the bus.
    ///
    /// Returns the new uploader's state.
    ///
    /// # Errors
    ///
    /// Returns an error if the new uploader stopped before accepting the file.
    pub fn start_upload(&self, file: FilePayload) -> Result<watch::Receiver<UploaderState>> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::Internal("controller lock poisoned".into()))?;
        if let Some(previous) = current.take() {
            tracing::debug!("Terminating previous uploader");
            previous.terminate();
        }

        tracing::info!(file_name = %file.name, size = file.size(), "Starting upload");
        let uploader = (self.factory)(&self.bus);
        uploader.start(file)?;
        let state = uploader.state();
        *current = Some(uploader);
        Ok(state)
    }

    /// Subscribe to view updates.
    #[must_use]
    pub fn view(&self) -> watch::Receiver<ControllerView> {
        self.view.clone()
    }

    /// Terminate the current uploader and unsubscribe from the bus.
    pub async fn shutdown(self) {
        let current = self.current.into_inner().ok().flatten();
        if let Some(uploader) = current {
            uploader.terminate();
            uploader.join().await;
        }
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Controller task panicked");
        }
    }
}

async fn reflect(
    mut endpoint: BusEndpoint,
    view: watch::Sender<ControllerView>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            message = endpoint.recv() => match message {
                Some(message) => message,
                None => break,
            },
            () = cancel.cancelled() => break,
        };

        view.send_if_modified(|current| current.apply(&message));
    }
}
