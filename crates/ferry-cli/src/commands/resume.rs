//! Resume command implementation.
//!
//! Runs the supervisor alone and asks it to resume once. No uploader exists
//! in this process, so a pending transfer is uploaded by the supervisor.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use ferry_core::bus::Bus;
use ferry_core::file::format_size;
use ferry_core::scheduler::LocalScheduler;
use ferry_core::supervisor::{ResumeOutcome, Supervisor};
use ferry_core::transport::HttpTransport;
use ferry_core::uploader::RetryPolicy;

use super::ResumeArgs;
use crate::ui::{self, ConsoleNotifier};

/// Run the resume command.
pub async fn run(args: ResumeArgs) -> Result<()> {
    let mut config = super::load_config()?;
    if let Some(endpoint) = args.endpoint {
        config.transfer.endpoint = endpoint;
        config.validate().context("Invalid endpoint")?;
    }

    let store = super::open_store(&config).await?;

    // A flag left by a process that died mid-heartbeat would hand the
    // transfer to an uploader that no longer exists.
    store
        .clear_liveness()
        .await
        .context("Failed to reset liveness flag")?;

    if !args.quiet {
        ui::banner();
        if let Some(pending) = store.pending_transfer().await? {
            println!("  Pending:  {}", pending.file.name);
            println!("  Size:     {}", format_size(pending.file.size()));
            println!(
                "  Saved:    {}",
                pending.stored_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("  Endpoint: {}", config.transfer.endpoint);
            println!();
        }
    }

    let bus = Bus::new(config.bus.capacity);
    let (scheduler, triggers) = LocalScheduler::new(config.supervisor.trigger_delay);
    let supervisor = Supervisor::new(
        store,
        Arc::new(HttpTransport::from_config(&config.transfer)),
        Arc::new(scheduler),
    )
    .with_config(config.supervisor.clone())
    .with_retry_policy(RetryPolicy::from(&config.transfer))
    .with_notifier(Arc::new(ConsoleNotifier::new(args.quiet)))
    .spawn(&bus, triggers);

    let outcome = supervisor.resume_worker_upload().await;
    supervisor.shutdown().await;

    match outcome.context("Resume failed")? {
        ResumeOutcome::Uploaded => {
            if !args.quiet {
                println!("  Upload complete.");
            }
        }
        ResumeOutcome::NothingPending => {
            if !args.quiet {
                println!("  Nothing to resume.");
            }
        }
        ResumeOutcome::WorkerAlive => {
            if !args.quiet {
                println!("  Another uploader answered and took over the transfer.");
            }
        }
        ResumeOutcome::Failed { reason } => {
            bail!("Upload failed ({}). The transfer is still pending.", reason);
        }
    }

    Ok(())
}
