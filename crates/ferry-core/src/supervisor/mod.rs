//! Supervisor: the context that outlives the others and finishes their work.
//!
//! The supervisor listens on the bus for retry requests and registers a
//! recovery trigger for them. When the trigger fires it decides who resumes
//! the upload:
//!
//! 1. publish a heartbeat probe,
//! 2. wait the grace window,
//! 3. read the liveness flag from the durable store.
//!
//! A positive flag means an uploader is alive and gets a resume command.
//! Otherwise the supervisor uploads the pending transfer itself and reports
//! the outcome through its [`Notifier`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, BusEndpoint, BusPublisher};
use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::notify::{LogNotifier, Notifier, NOTIFY_FAILED, NOTIFY_RESUMING, NOTIFY_SUCCESS};
use crate::protocol::{TransferMessage, STATUS_DONE, STATUS_FAILED, STATUS_RETRYING};
use crate::scheduler::{RecoveryScheduler, Registrar, TriggerReceiver};
use crate::store::TransferStore;
use crate::transport::{Transport, TransportOutcome};
use crate::uploader::{monotonic_progress, RetryPolicy};

/// Result of one resume run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// A live uploader answered the probe and was told to resume.
    WorkerAlive,
    /// Nobody answered and nothing was pending.
    NothingPending,
    /// The supervisor uploaded the pending transfer itself.
    Uploaded,
    /// The supervisor's own upload failed; the transfer stays pending.
    Failed {
        /// Why the upload failed
        reason: String,
    },
}

impl fmt::Display for ResumeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerAlive => f.write_str("handed to live uploader"),
            Self::NothingPending => f.write_str("nothing pending"),
            Self::Uploaded => f.write_str("uploaded"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Supervisor blueprint.
pub struct Supervisor {
    store: TransferStore,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn RecoveryScheduler>,
    notifier: Arc<dyn Notifier>,
    config: SupervisorConfig,
    policy: RetryPolicy,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor with default timings and a logging notifier.
    pub fn new(
        store: TransferStore,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn RecoveryScheduler>,
    ) -> Self {
        Self {
            store,
            transport,
            scheduler,
            notifier: Arc::new(LogNotifier),
            config: SupervisorConfig::default(),
            policy: RetryPolicy::default(),
        }
    }

    /// Set the notification sink.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set timings and the retry tag.
    #[must_use]
    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the HTTP error policy for uploads the supervisor makes itself.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start the supervisor context on `bus`, serving triggers from `triggers`.
    #[must_use]
    pub fn spawn(self, bus: &Bus, triggers: TriggerReceiver) -> SupervisorHandle {
        let endpoint = bus.endpoint("supervisor");
        let cancel = CancellationToken::new();
        let (outcomes, _) = broadcast::channel(16);

        let core = Arc::new(Core {
            publisher: endpoint.publisher(),
            registrar: Registrar::new(
                self.scheduler,
                self.config.registration_retry,
                cancel.child_token(),
            ),
            store: self.store,
            transport: self.transport,
            notifier: self.notifier,
            config: self.config,
            policy: self.policy,
            cancel: cancel.clone(),
            resume_lock: tokio::sync::Mutex::new(()),
        });

        let tasks = vec![
            tokio::spawn(listen(Arc::clone(&core), endpoint)),
            tokio::spawn(serve_triggers(
                Arc::clone(&core),
                triggers,
                outcomes.clone(),
            )),
        ];

        tracing::debug!(tag = %core.config.retry_tag, "Supervisor started");
        SupervisorHandle {
            core,
            cancel,
            outcomes,
            tasks,
        }
    }
}

/// Handle to a running supervisor. Dropping it stops the supervisor.
pub struct SupervisorHandle {
    core: Arc<Core>,
    cancel: CancellationToken,
    outcomes: broadcast::Sender<ResumeOutcome>,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SupervisorHandle {
    /// Run the resume decision now, outside of any trigger.
    ///
    /// Runs are serialized with those started by triggers.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable store fails.
    pub async fn resume_worker_upload(&self) -> Result<ResumeOutcome> {
        self.core.resume_worker_upload().await
    }

    /// Subscribe to outcomes of trigger-driven resume runs.
    #[must_use]
    pub fn outcomes(&self) -> broadcast::Receiver<ResumeOutcome> {
        self.outcomes.subscribe()
    }

    /// Stop both loops and any registration retry, then wait for them.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Supervisor task panicked");
            }
        }
        tracing::debug!("Supervisor stopped");
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Core {
    publisher: BusPublisher,
    store: TransferStore,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    registrar: Registrar,
    config: SupervisorConfig,
    policy: RetryPolicy,
    cancel: CancellationToken,
    resume_lock: tokio::sync::Mutex<()>,
}

impl Core {
    fn request_retry(&self) {
        // Dropping the handle detaches the loop; the cancel token still stops it.
        let _ = self.registrar.request(&self.config.retry_tag);
    }

    async fn on_message(&self, message: TransferMessage) {
        match message {
            TransferMessage::Status {
                retry_requested: true,
                text,
            } => {
                tracing::info!(status = %text, "Retry requested, registering recovery trigger");
                self.request_retry();
                self.publisher
                    .publish(TransferMessage::status(STATUS_RETRYING, false));
            }
            TransferMessage::HeartbeatAck => {
                if let Err(e) = self.store.set_liveness(true).await {
                    tracing::warn!(error = %e, "Failed to record heartbeat ack");
                }
            }
            TransferMessage::Ready { .. }
            | TransferMessage::Progress { .. }
            | TransferMessage::Status { .. }
            | TransferMessage::HeartbeatProbe
            | TransferMessage::ResumeCommand
            | TransferMessage::Terminate => {}
        }
    }

    async fn resume_worker_upload(&self) -> Result<ResumeOutcome> {
        let _guard = self.resume_lock.lock().await;

        self.publisher.publish(TransferMessage::HeartbeatProbe);
        tokio::time::sleep(self.config.heartbeat_grace).await;

        if self.store.liveness().await? == Some(true) {
            self.store.set_liveness(false).await?;
            tracing::info!("Uploader is alive, handing over the retry");
            self.publisher.publish(TransferMessage::ResumeCommand);
            self.schedule_liveness_reset();
            return Ok(ResumeOutcome::WorkerAlive);
        }

        let Some(pending) = self.store.pending_transfer().await? else {
            tracing::debug!("No uploader alive and nothing pending");
            return Ok(ResumeOutcome::NothingPending);
        };

        let file = pending.file;
        tracing::info!(file_name = %file.name, size = file.size(), "Resuming upload in the background");
        self.notifier.display(NOTIFY_RESUMING).await;
        self.publisher
            .publish(TransferMessage::ready(file.name.clone()));

        let progress = monotonic_progress(self.publisher.clone());
        let failure = match self.transport.send(&file, progress).await {
            Ok(TransportOutcome::Accepted) => {
                self.store.clear_pending_transfer().await?;
                self.publisher
                    .publish(TransferMessage::status(STATUS_DONE, false));
                self.notifier.display(NOTIFY_SUCCESS).await;
                tracing::info!(file_name = %file.name, "Background upload complete");
                return Ok(ResumeOutcome::Uploaded);
            }
            Ok(TransportOutcome::Rejected { status }) => Error::HttpStatus(status),
            Err(e) => e,
        };

        tracing::warn!(file_name = %file.name, error = %failure, "Background upload failed");
        let retry = match failure {
            Error::HttpStatus(_) => self.policy.retry_http_errors,
            ref e => e.is_recoverable(),
        };
        let text = match failure {
            Error::HttpStatus(status) => format!("{STATUS_FAILED}: HTTP {status}"),
            _ => STATUS_FAILED.to_string(),
        };
        self.publisher.publish(TransferMessage::status(text, false));
        self.notifier.display(NOTIFY_FAILED).await;
        if retry {
            self.request_retry();
        }

        Ok(ResumeOutcome::Failed {
            reason: failure.to_string(),
        })
    }

    fn schedule_liveness_reset(&self) {
        let store = self.store.clone();
        let delay = self.config.liveness_reset_delay;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    if let Err(e) = store.set_liveness(false).await {
                        tracing::warn!(error = %e, "Failed to reset liveness flag");
                    }
                }
                () = cancel.cancelled() => {}
            }
        });
    }
}

async fn listen(core: Arc<Core>, mut endpoint: BusEndpoint) {
    loop {
        tokio::select! {
            message = endpoint.recv() => match message {
                Some(message) => core.on_message(message).await,
                None => break,
            },
            () = core.cancel.cancelled() => break,
        }
    }
}

async fn serve_triggers(
    core: Arc<Core>,
    mut triggers: TriggerReceiver,
    outcomes: broadcast::Sender<ResumeOutcome>,
) {
    loop {
        let tag = tokio::select! {
            tag = triggers.recv() => match tag {
                Some(tag) => tag,
                None => break,
            },
            () = core.cancel.cancelled() => break,
        };

        if tag != core.config.retry_tag {
            tracing::debug!(tag = %tag, "Ignoring unknown recovery trigger");
            continue;
        }

        tracing::info!(tag = %tag, "Recovery trigger fired");
        let run = tokio::select! {
            run = core.resume_worker_upload() => run,
            () = core.cancel.cancelled() => break,
        };
        match run {
            Ok(outcome) => {
                tracing::info!(%outcome, "Resume finished");
                let _ = outcomes.send(outcome);
            }
            Err(e) => tracing::error!(error = %e, "Resume failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FilePayload;
    use crate::scheduler::LocalScheduler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingTransport {
        posts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(
            &self,
            _file: &FilePayload,
            progress: crate::transport::ProgressFn,
        ) -> Result<TransportOutcome> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            progress(1.0);
            Ok(TransportOutcome::Accepted)
        }
    }

    fn supervisor(
        bus: &Bus,
        store: &TransferStore,
        transport: Arc<CountingTransport>,
    ) -> (SupervisorHandle, LocalScheduler) {
        let (scheduler, triggers) = LocalScheduler::new(Duration::from_secs(1));
        let handle = Supervisor::new(store.clone(), transport, Arc::new(scheduler.clone()))
            .spawn(bus, triggers);
        (handle, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_pending_without_uploader() {
        let bus = Bus::default();
        let store = TransferStore::in_memory();
        let transport = Arc::new(CountingTransport::default());
        let (handle, _scheduler) = supervisor(&bus, &store, transport.clone());

        let outcome = handle.resume_worker_upload().await.unwrap();

        assert_eq!(outcome, ResumeOutcome::NothingPending);
        assert_eq!(transport.posts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_flag_reads_as_dead() {
        let bus = Bus::default();
        let store = TransferStore::in_memory();
        store.set_liveness(false).await.unwrap();
        store
            .save_pending_transfer(&FilePayload::new("video.mp4", vec![9; 32]))
            .await
            .unwrap();
        let transport = Arc::new(CountingTransport::default());
        let (handle, _scheduler) = supervisor(&bus, &store, transport.clone());

        let outcome = handle.resume_worker_upload().await.unwrap();

        assert_eq!(outcome, ResumeOutcome::Uploaded);
        assert_eq!(transport.posts.load(Ordering::SeqCst), 1);
        assert!(store.pending_transfer().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_status_registers_trigger() {
        let bus = Bus::default();
        let store = TransferStore::in_memory();
        let (handle, scheduler) = supervisor(&bus, &store, Arc::default());
        let mut observer = bus.endpoint("observer");

        observer.publish(TransferMessage::status(STATUS_FAILED, true));

        assert_eq!(
            observer.recv().await,
            Some(TransferMessage::status(STATUS_RETRYING, false))
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.is_pending(crate::RETRY_TAG));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_sets_liveness_flag() {
        let bus = Bus::default();
        let store = TransferStore::in_memory();
        let (_handle, _scheduler) = supervisor(&bus, &store, Arc::default());
        let observer = bus.endpoint("observer");

        observer.publish(TransferMessage::HeartbeatAck);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.liveness().await.unwrap(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_listener() {
        let bus = Bus::default();
        let store = TransferStore::in_memory();
        let (handle, _scheduler) = supervisor(&bus, &store, Arc::default());
        assert_eq!(bus.endpoint_count(), 1);

        handle.shutdown().await;
        assert_eq!(bus.endpoint_count(), 0);
    }
}
