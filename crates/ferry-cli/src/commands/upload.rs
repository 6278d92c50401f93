//! Upload command implementation.
//!
//! Runs the controller, an uploader and the supervisor in one process. When
//! the connection drops the uploader keeps the payload in the store and the
//! supervisor schedules a recovery; the command waits for that recovery to
//! settle before exiting.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, watch};

use ferry_core::bus::Bus;
use ferry_core::controller::{Controller, ControllerView};
use ferry_core::file::{format_size, FilePayload};
use ferry_core::protocol::{STATUS_DONE, STATUS_FAILED, STATUS_RETRYING};
use ferry_core::scheduler::LocalScheduler;
use ferry_core::store::TransferStore;
use ferry_core::supervisor::{ResumeOutcome, Supervisor};
use ferry_core::transport::HttpTransport;
use ferry_core::uploader::{RetryPolicy, Uploader};

use super::UploadArgs;
use crate::ui::{self, ConsoleNotifier};

/// Run the upload command.
pub async fn run(args: UploadArgs) -> Result<()> {
    let mut config = super::load_config()?;
    if let Some(endpoint) = args.endpoint {
        config.transfer.endpoint = endpoint;
        config.validate().context("Invalid endpoint")?;
    }

    let file = FilePayload::from_path(&args.path)
        .await
        .with_context(|| format!("Failed to read {}", args.path.display()))?;

    let store = super::open_store(&config).await?;
    let transport = Arc::new(HttpTransport::from_config(&config.transfer));
    let policy = RetryPolicy::from(&config.transfer);
    let bus = Bus::new(config.bus.capacity);

    let (scheduler, triggers) = LocalScheduler::new(config.supervisor.trigger_delay);
    let supervisor = Supervisor::new(store.clone(), transport.clone(), Arc::new(scheduler))
        .with_config(config.supervisor.clone())
        .with_retry_policy(policy)
        .with_notifier(Arc::new(ConsoleNotifier::new(args.quiet)))
        .spawn(&bus, triggers);
    let outcomes = supervisor.outcomes();

    let controller = Controller::new(
        bus.clone(),
        Uploader::new(store.clone(), transport)
            .with_retry_policy(policy)
            .factory(),
    );

    if !args.quiet {
        ui::banner();
        println!("  File:     {}", file.name);
        println!("  Size:     {}", format_size(file.size()));
        println!("  Endpoint: {}", config.transfer.endpoint);
        println!();
    }

    let view = controller.view();
    let progress_handle = if args.quiet {
        None
    } else {
        Some(tokio::spawn(display_progress(view.clone())))
    };

    let start_time = Instant::now();
    controller
        .start_upload(file)
        .context("Failed to start uploader")?;

    let finish = tokio::select! {
        result = wait_for_settlement(view, outcomes) => result.map(|()| Finish::Completed),
        _ = tokio::signal::ctrl_c() => Ok(Finish::Interrupted),
    };

    controller.shutdown().await;
    supervisor.shutdown().await;
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    conclude(finish?, &store, args.quiet, start_time.elapsed()).await
}

/// How the wait for the upload ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Completed,
    Interrupted,
}

/// Report the end of the command.
///
/// An interrupted upload is an error; `ferry resume` is only suggested when
/// something was actually persisted.
async fn conclude(
    finish: Finish,
    store: &TransferStore,
    quiet: bool,
    elapsed: Duration,
) -> Result<()> {
    match finish {
        Finish::Completed => {
            if !quiet {
                println!();
                println!("  Upload complete in {:.1}s", elapsed.as_secs_f64());
            }
            Ok(())
        }
        Finish::Interrupted => {
            let pending = store
                .pending_transfer()
                .await
                .context("Failed to read pending transfer")?;
            match pending {
                Some(pending) => bail!(
                    "Upload interrupted. {} is saved; run 'ferry resume' to finish it.",
                    pending.file.name
                ),
                None => bail!("Upload interrupted. Nothing was saved."),
            }
        }
    }
}

/// Wait until the upload either lands or fails for good.
///
/// A plain `failed` status means the uploader kept the payload and asked for
/// a retry, so the wait continues. A `failed: ...` status is terminal.
async fn wait_for_settlement(
    mut view: watch::Receiver<ControllerView>,
    mut outcomes: broadcast::Receiver<ResumeOutcome>,
) -> Result<()> {
    loop {
        tokio::select! {
            changed = view.changed() => {
                changed.context("Controller stopped")?;
                let status = view.borrow_and_update().status.clone();
                match status.as_deref() {
                    Some(STATUS_DONE) => return Ok(()),
                    Some(text) if text.starts_with(&format!("{STATUS_FAILED}:")) => {
                        bail!("Upload {}", text);
                    }
                    _ => {}
                }
            }
            outcome = outcomes.recv() => match outcome {
                Ok(ResumeOutcome::Uploaded) => return Ok(()),
                Ok(ResumeOutcome::Failed { reason }) => {
                    bail!(
                        "Background retry failed ({}). The upload is still pending; run 'ferry resume' to try again.",
                        reason
                    );
                }
                Ok(ResumeOutcome::WorkerAlive | ResumeOutcome::NothingPending) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Missed resume outcomes");
                }
                Err(broadcast::error::RecvError::Closed) => bail!("Supervisor stopped"),
            },
        }
    }
}

async fn display_progress(mut rx: watch::Receiver<ControllerView>) {
    let mut last_status: Option<String> = None;

    loop {
        let view = rx.borrow_and_update().clone();

        if view.status != last_status {
            last_status.clone_from(&view.status);
            match view.status.as_deref() {
                Some(STATUS_DONE) => {
                    print_bar(&view);
                    break;
                }
                Some(STATUS_FAILED) => {
                    println!();
                    println!("  Connection lost, upload saved for retry.");
                }
                Some(STATUS_RETRYING) => {
                    println!("  Waiting for background recovery...");
                }
                Some(text) if text.starts_with(STATUS_FAILED) => {
                    println!();
                    println!("  Upload {}", text);
                    break;
                }
                _ => {}
            }
        }

        if view.file_name.is_some() && view.status.is_none() {
            print_bar(&view);
        }

        if rx.changed().await.is_err() {
            break;
        }
    }

    println!();
}

fn print_bar(view: &ControllerView) {
    print!(
        "\r  {} {:>6.2}% {}    ",
        ui::progress_bar(view.progress),
        view.progress * 100.0,
        view.file_name.as_deref().unwrap_or_default()
    );
    let _ = io::stdout().flush();
}
