//! Configuration commands

use std::path::Path;

use anyhow::{Context, Result};
use ckpt_convert::ConverterConfig;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Show the effective configuration (file, environment and flags applied)
    Show,
    /// Print the default configuration
    Default,
    /// Show the configuration file in use
    Path,
}

pub fn execute(action: ConfigAction, config: &ConverterConfig, file: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", config.to_toml().context("Failed to serialize configuration")?);
        }
        ConfigAction::Default => print_default()?,
        ConfigAction::Path => match file {
            Some(path) => println!("{}", path.display()),
            None => println!("(none, using defaults)"),
        },
    }
    Ok(())
}

/// Print the defaults without reading any file or environment.
pub fn print_default() -> Result<()> {
    print!("{}", ConverterConfig::default_toml().context("Failed to serialize configuration")?);
    Ok(())
}
