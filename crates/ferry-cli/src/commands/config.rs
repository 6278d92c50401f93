//! Config command implementation.

use anyhow::{Context, Result};

use ferry_core::config::Config;

use super::ConfigArgs;

/// Run the config command.
pub fn run(args: &ConfigArgs) -> Result<()> {
    if args.path {
        println!("{}", Config::config_path().display());
        return Ok(());
    }

    let config = super::load_config()?;
    let rendered = config
        .to_toml()
        .context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
