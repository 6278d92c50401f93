//! Ferry CLI - Resumable uploads that survive a crashed uploader
//!
//! Ferry streams a file to an HTTP backend. When the upload is interrupted
//! the payload is kept on disk and a supervisor finishes the job later.
//!
//! ## Quick Start
//!
//! ```bash
//! # Upload a file
//! ferry upload ./video.mp4
//!
//! # Finish an upload interrupted by a previous run
//! ferry resume
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Upload(args) => commands::upload::run(args).await,
        Command::Resume(args) => commands::resume::run(args).await,
        Command::Status(args) => commands::status::run(args).await,
        Command::Clear(args) => commands::clear::run(args).await,
        Command::Config(args) => commands::config::run(&args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,ferry=info,ferry_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
