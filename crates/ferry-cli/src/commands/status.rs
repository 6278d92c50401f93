//! Status command implementation.

use anyhow::{Context, Result};

use ferry_core::file::format_size;

use super::StatusArgs;

/// Run the status command.
pub async fn run(args: StatusArgs) -> Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    let pending = store
        .pending_transfer()
        .await
        .context("Failed to read pending transfer")?;
    let liveness = store
        .liveness()
        .await
        .context("Failed to read liveness flag")?;

    if args.json {
        let output = serde_json::json!({
            "pending": pending.as_ref().map(|p| serde_json::json!({
                "file_name": p.file.name,
                "content_type": p.file.content_type,
                "size": p.file.size(),
                "stored_at": p.stored_at.to_rfc3339(),
            })),
            "liveness": liveness,
            "store": config.store.resolved_directory(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match &pending {
        Some(p) => {
            println!("Pending upload:");
            println!("  File:   {}", p.file.name);
            println!("  Size:   {}", format_size(p.file.size()));
            println!("  Saved:  {}", p.stored_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("No pending upload."),
    }

    let liveness = match liveness {
        Some(true) => "alive",
        Some(false) => "not alive",
        None => "unset",
    };
    println!("Liveness flag: {}", liveness);
    println!("Store: {}", config.store.resolved_directory().display());
    Ok(())
}
