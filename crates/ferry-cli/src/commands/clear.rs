//! Clear command implementation.

use anyhow::{Context, Result};

use super::ClearArgs;

/// Run the clear command.
pub async fn run(args: ClearArgs) -> Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    let pending = store.pending_transfer().await?;
    store
        .clear_pending_transfer()
        .await
        .context("Failed to delete pending transfer")?;
    store
        .clear_liveness()
        .await
        .context("Failed to delete liveness flag")?;

    if !args.quiet {
        match pending {
            Some(pending) => println!("Discarded pending upload of {}", pending.file.name),
            None => println!("Nothing pending."),
        }
    }
    Ok(())
}
