//! Upload worker.
//!
//! An uploader streams one file at a time to the backend and reports on the
//! bus. Its lifecycle is `Idle → Transmitting → {Succeeded | Failed}`; a
//! finished uploader stays alive and can be told to resume a persisted
//! transfer with [`TransferMessage::ResumeCommand`].
//!
//! Whatever it is doing, the uploader answers a [`TransferMessage::HeartbeatProbe`]
//! by writing the liveness flag and publishing [`TransferMessage::HeartbeatAck`].
//! On a network failure the full payload is persisted before the retry
//! request goes out, so the supervisor can always find it.
//!
//! A [`TransferMessage::ResumeCommand`] reaches every uploader on the bus.
//! Only the uploader that persisted the entry resumes it right away. Any
//! other idle uploader waits for the adopt delay and takes the entry over
//! only if nobody announced a `Ready` in the meantime.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::bus::{Bus, BusEndpoint, BusPublisher};
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::file::FilePayload;
use crate::protocol::{TransferMessage, STATUS_DONE, STATUS_FAILED};
use crate::store::TransferStore;
use crate::transport::{ProgressFn, Transport, TransportOutcome};

/// Lifecycle state of an uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploaderState {
    /// Waiting for a file
    #[default]
    Idle,
    /// Streaming a file to the backend
    Transmitting,
    /// The last attempt was accepted
    Succeeded,
    /// The last attempt failed
    Failed,
}

impl UploaderState {
    /// Whether an attempt has finished, one way or the other.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for UploaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Transmitting => "transmitting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How HTTP error statuses are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Persist and request a retry on HTTP errors, as for network failures.
    ///
    /// When unset an HTTP error ends the upload for good.
    pub retry_http_errors: bool,
}

impl From<&TransferConfig> for RetryPolicy {
    fn from(config: &TransferConfig) -> Self {
        Self {
            retry_http_errors: config.retry_http_errors,
        }
    }
}

/// Builds a fresh uploader on a bus.
pub type UploaderFactory = Arc<dyn Fn(&Bus) -> UploaderHandle + Send + Sync>;

/// Uploader blueprint: the collaborators every spawned uploader shares.
#[derive(Clone)]
pub struct Uploader {
    store: TransferStore,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    adopt_delay: Duration,
}

impl fmt::Debug for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("policy", &self.policy)
            .field("adopt_delay", &self.adopt_delay)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    /// Create an uploader blueprint.
    pub fn new(store: TransferStore, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            policy: RetryPolicy::default(),
            adopt_delay: Duration::from_millis(crate::DEFAULT_ADOPT_DELAY_MS),
        }
    }

    /// Set the HTTP error policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set how long an uploader waits before taking over a transfer that
    /// another uploader persisted.
    #[must_use]
    pub fn with_adopt_delay(mut self, delay: Duration) -> Self {
        self.adopt_delay = delay;
        self
    }

    /// Turn the blueprint into a factory closure.
    #[must_use]
    pub fn factory(self) -> UploaderFactory {
        Arc::new(move |bus: &Bus| self.spawn(bus))
    }

    /// Start an uploader context on `bus`.
    ///
    /// The uploader is subscribed before this returns, so it sees every
    /// message published afterwards.
    #[must_use]
    pub fn spawn(&self, bus: &Bus) -> UploaderHandle {
        let endpoint = bus.endpoint("uploader");
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(UploaderState::Idle);

        let worker = Worker {
            id: endpoint.publisher().id(),
            endpoint,
            store: self.store.clone(),
            transport: Arc::clone(&self.transport),
            policy: self.policy,
            adopt_delay: self.adopt_delay,
            state_tx,
        };
        let task = tokio::spawn(worker.run(commands_rx));

        UploaderHandle {
            commands: commands_tx,
            state: state_rx,
            task,
        }
    }
}

#[derive(Debug)]
enum Command {
    Start(FilePayload),
    Terminate,
}

/// Handle to a running uploader.
///
/// Dropping the handle does not stop the uploader: it keeps serving the bus
/// until it receives [`TransferMessage::Terminate`] or [`Self::terminate`].
#[derive(Debug)]
pub struct UploaderHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<UploaderState>,
    task: JoinHandle<()>,
}

impl UploaderHandle {
    /// Hand a file to the uploader.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextTerminated`] if the uploader has stopped.
    pub fn start(&self, file: FilePayload) -> Result<()> {
        self.commands
            .send(Command::Start(file))
            .map_err(|_| Error::ContextTerminated)
    }

    /// Ask the uploader to stop, aborting any attempt in flight.
    pub fn terminate(&self) {
        let _ = self.commands.send(Command::Terminate);
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<UploaderState> {
        self.state.clone()
    }

    /// Current state.
    #[must_use]
    pub fn current_state(&self) -> UploaderState {
        *self.state.borrow()
    }

    /// Whether the uploader context has stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the uploader context to stop.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Uploader task panicked");
        }
    }
}

struct Worker {
    id: Uuid,
    endpoint: BusEndpoint,
    store: TransferStore,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    adopt_delay: Duration,
    state_tx: watch::Sender<UploaderState>,
}

/// What the worker is juggling besides bus traffic.
#[derive(Default)]
struct Work {
    attempt: Option<JoinHandle<UploaderState>>,
    /// When to take over a transfer persisted by another uploader
    adopt_at: Option<Instant>,
}

enum Flow {
    Continue,
    Stop,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut work = Work::default();
        let mut commands_open = true;

        tracing::debug!(uploader = %self.id, "Uploader started");

        loop {
            tokio::select! {
                message = self.endpoint.recv() => {
                    let Some(message) = message else { break };
                    if let Flow::Stop = self.on_message(message, &mut work).await {
                        break;
                    }
                }
                command = commands.recv(), if commands_open => match command {
                    Some(Command::Start(file)) => self.start_attempt(file, false, &mut work),
                    Some(Command::Terminate) => break,
                    None => commands_open = false,
                },
                finished = wait_attempt(&mut work.attempt) => {
                    work.attempt = None;
                    let state = finished.unwrap_or_else(|e| {
                        tracing::error!(error = %e, "Upload attempt panicked");
                        UploaderState::Failed
                    });
                    self.state_tx.send_replace(state);
                }
                () = wait_until(work.adopt_at) => {
                    work.adopt_at = None;
                    self.adopt_pending(&mut work).await;
                }
            }
        }

        if let Some(handle) = work.attempt.take() {
            tracing::info!("Aborting upload in flight");
            handle.abort();
        }
        tracing::debug!(uploader = %self.id, "Uploader stopped");
    }

    async fn on_message(&mut self, message: TransferMessage, work: &mut Work) -> Flow {
        match message {
            TransferMessage::HeartbeatProbe => {
                if let Err(e) = self.store.set_liveness(true).await {
                    tracing::warn!(error = %e, "Failed to write liveness flag");
                }
                self.endpoint.publish(TransferMessage::HeartbeatAck);
            }
            TransferMessage::ResumeCommand => {
                if work.attempt.is_some() {
                    tracing::debug!("Ignoring resume command, upload already in progress");
                    return Flow::Continue;
                }
                match self.store.pending_transfer().await {
                    Ok(Some(pending)) if pending.is_owned_by(self.id) => {
                        tracing::info!(file_name = %pending.file.name, "Resuming pending upload");
                        self.start_attempt(pending.file, true, work);
                    }
                    Ok(Some(pending)) => {
                        tracing::debug!(
                            file_name = %pending.file.name,
                            owner = ?pending.owner,
                            "Pending upload belongs to another uploader, standing by"
                        );
                        work.adopt_at = Some(Instant::now() + self.adopt_delay);
                    }
                    Ok(None) => tracing::debug!("Ignoring resume command, nothing pending"),
                    Err(e) => self.report_store_failure(&e),
                }
            }
            TransferMessage::Ready { file_name } => {
                if work.adopt_at.take().is_some() {
                    tracing::debug!(file_name = %file_name, "Another context resumed the upload");
                }
            }
            TransferMessage::Terminate => return Flow::Stop,
            TransferMessage::Progress { .. }
            | TransferMessage::Status { .. }
            | TransferMessage::HeartbeatAck => {}
        }
        Flow::Continue
    }

    async fn adopt_pending(&self, work: &mut Work) {
        if work.attempt.is_some() {
            return;
        }
        match self.store.pending_transfer().await {
            Ok(Some(pending)) => {
                tracing::info!(
                    file_name = %pending.file.name,
                    owner = ?pending.owner,
                    "Taking over pending upload"
                );
                self.start_attempt(pending.file, true, work);
            }
            Ok(None) => tracing::debug!("Pending upload already handled"),
            Err(e) => self.report_store_failure(&e),
        }
    }

    fn report_store_failure(&self, e: &Error) {
        tracing::error!(error = %e, "Failed to read pending transfer");
        self.state_tx.send_replace(UploaderState::Failed);
        self.endpoint
            .publish(TransferMessage::status(format!("{STATUS_FAILED}: {e}"), false));
    }

    fn start_attempt(&self, file: FilePayload, resumed: bool, work: &mut Work) {
        work.adopt_at = None;
        if work.attempt.is_some() {
            tracing::warn!(file_name = %file.name, "Upload already in progress, ignoring file");
            return;
        }

        self.state_tx.send_replace(UploaderState::Transmitting);
        let ctx = AttemptContext {
            publisher: self.endpoint.publisher(),
            store: self.store.clone(),
            transport: Arc::clone(&self.transport),
            policy: self.policy,
        };
        work.attempt = Some(tokio::spawn(ctx.run(file, resumed)));
    }
}

async fn wait_attempt(
    attempt: &mut Option<JoinHandle<UploaderState>>,
) -> std::result::Result<UploaderState, tokio::task::JoinError> {
    match attempt {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct AttemptContext {
    publisher: BusPublisher,
    store: TransferStore,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl AttemptContext {
    async fn run(self, file: FilePayload, resumed: bool) -> UploaderState {
        tracing::info!(file_name = %file.name, size = file.size(), resumed, "Upload started");
        self.publisher.publish(TransferMessage::ready(file.name.clone()));

        let progress = monotonic_progress(self.publisher.clone());
        match self.transport.send(&file, progress).await {
            Ok(TransportOutcome::Accepted) => self.succeed(&file, resumed).await,
            Ok(TransportOutcome::Rejected { status }) if self.policy.retry_http_errors => {
                self.persist_for_retry(&file, &Error::HttpStatus(status))
                    .await
            }
            Ok(TransportOutcome::Rejected { status }) => {
                tracing::warn!(file_name = %file.name, status, "Upload rejected by server");
                self.publisher.publish(TransferMessage::status(
                    format!("{STATUS_FAILED}: HTTP {status}"),
                    false,
                ));
                UploaderState::Failed
            }
            Err(e) => self.persist_for_retry(&file, &e).await,
        }
    }

    async fn succeed(&self, file: &FilePayload, resumed: bool) -> UploaderState {
        if resumed {
            if let Err(e) = self.store.clear_pending_transfer().await {
                return self.store_failure(&e);
            }
        }
        tracing::info!(file_name = %file.name, "Upload complete");
        self.publisher
            .publish(TransferMessage::status(STATUS_DONE, false));
        UploaderState::Succeeded
    }

    async fn persist_for_retry(&self, file: &FilePayload, cause: &Error) -> UploaderState {
        tracing::warn!(file_name = %file.name, error = %cause, "Upload failed, saving for retry");

        let owner = self.publisher.id();
        if let Err(e) = self.store.save_owned_pending_transfer(file, owner).await {
            return self.store_failure(&e);
        }
        self.publisher
            .publish(TransferMessage::status(STATUS_FAILED, true));
        UploaderState::Failed
    }

    fn store_failure(&self, e: &Error) -> UploaderState {
        tracing::error!(error = %e, "Durable store failure during upload");
        self.publisher
            .publish(TransferMessage::status(format!("{STATUS_FAILED}: {e}"), false));
        UploaderState::Failed
    }
}

/// Progress callback that publishes clamped, non-decreasing fractions.
pub(crate) fn monotonic_progress(publisher: BusPublisher) -> ProgressFn {
    let last = Mutex::new(None::<f64>);
    Arc::new(move |fraction: f64| {
        let TransferMessage::Progress { fraction } = TransferMessage::progress(fraction) else {
            return;
        };
        let Ok(mut last) = last.lock() else {
            return;
        };
        if last.is_some_and(|prev| fraction <= prev) {
            return;
        }
        *last = Some(fraction);
        publisher.publish(TransferMessage::Progress { fraction });
    })
}
