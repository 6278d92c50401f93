//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ferry_core::config::Config;
use ferry_core::store::{FileStore, TransferStore};

/// Load configuration, falling back to defaults when no file exists.
///
/// A file that exists but does not parse or validate is an error, so a typo
/// never silently resets the endpoint.
pub fn load_config() -> Result<Config> {
    Config::load().context("Failed to load configuration")
}

/// Open the durable store configured in `config`.
pub async fn open_store(config: &Config) -> Result<TransferStore> {
    let dir = config.store.resolved_directory();
    let store = FileStore::open(dir.clone())
        .await
        .with_context(|| format!("Failed to open store at {}", dir.display()))?;
    Ok(TransferStore::new(Arc::new(store)))
}

pub mod clear;
pub mod config;
pub mod resume;
pub mod status;
pub mod upload;

/// Ferry - Resumable uploads that survive a crashed uploader
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Upload a file, resuming in the background if the connection drops
    Upload(UploadArgs),

    /// Finish an upload left pending by a previous run
    Resume(ResumeArgs),

    /// Show the pending transfer and liveness flag
    Status(StatusArgs),

    /// Forget the pending transfer and liveness flag
    Clear(ClearArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the upload command
#[derive(Parser)]
pub struct UploadArgs {
    /// File to upload
    pub path: PathBuf,

    /// Backend endpoint, overriding the configured one
    #[arg(short, long, env = "FERRY_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the resume command
#[derive(Parser)]
pub struct ResumeArgs {
    /// Backend endpoint, overriding the configured one
    #[arg(short, long, env = "FERRY_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the status command
#[derive(Parser)]
pub struct StatusArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the clear command
#[derive(Parser)]
pub struct ClearArgs {
    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Print the configuration file path instead of its contents
    #[arg(long)]
    pub path: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload() {
        let cli = Cli::parse_from([
            "ferry",
            "upload",
            "video.mp4",
            "--endpoint",
            "http://127.0.0.1:9000/upload",
            "-q",
        ]);
        let Command::Upload(args) = cli.command else {
            panic!("expected upload command");
        };
        assert_eq!(args.path, PathBuf::from("video.mp4"));
        assert_eq!(
            args.endpoint.as_deref(),
            Some("http://127.0.0.1:9000/upload")
        );
        assert!(args.quiet);
    }

    #[test]
    fn test_parse_status_json() {
        let cli = Cli::parse_from(["ferry", "status", "--json"]);
        assert!(matches!(cli.command, Command::Status(StatusArgs { json: true })));
    }

    #[tokio::test]
    async fn test_open_store_uses_configured_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.directory = Some(temp_dir.path().join("store"));

        let store = open_store(&config).await.unwrap();
        store
            .save_pending_transfer(&ferry_core::file::FilePayload::new("a.txt", b"abc".to_vec()))
            .await
            .unwrap();

        let reopened = open_store(&config).await.unwrap();
        let pending = reopened.pending_transfer().await.unwrap().unwrap();
        assert_eq!(pending.file.name, "a.txt");
        assert!(temp_dir.path().join("store").is_dir());
    }
}
