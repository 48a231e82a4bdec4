//! ckpt-convert command-line front end
//!
//! # Usage
//!
//! ```bash
//! # Convert ../fairy-safe/pytorch_model.bin into ../fairy-safe/model.ot
//! ckpt-convert convert --model-dir ../fairy-safe
//!
//! # Explicit paths, a different finishing tool and a bounded run time
//! ckpt-convert convert --input model.safetensors --output model.ot \
//!         --tool convert-tensor --timeout-secs 600 --report model.ot.meta.json
//!
//! # Keep the f32 archive instead of running a tool
//! ckpt-convert export --input pytorch_model.bin --output weights.npz
//!
//! # List tensors
//! ckpt-convert inspect pytorch_model.bin --json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ckpt_convert::ConfigBuilder;
use ckpt_convert::config::DEFAULT_CONFIG_FILE;
use clap::{Parser, Subcommand};
use tracing::debug;

mod commands;
mod exit;
mod logging;

use commands::{ConfigAction, ConvertCommand, ExportCommand, InspectCommand};

/// Checkpoint converter
#[derive(Parser)]
#[command(name = "ckpt-convert")]
#[command(about = "Convert model checkpoints through an f32 NumPy archive")]
#[command(long_about = r#"
Loads a parameter checkpoint (PyTorch, SafeTensors or .npz), casts every tensor
to f32, adds lm_head.weight as a copy of wte.weight, writes a temporary .npz
archive and hands it to an external conversion tool:

    <tool> [tool-args...] <archive> <target>

The archive is deleted once the tool returns.

Configuration is read from --config, else ./ckpt-convert.toml when present,
then CKPT_CONVERT_* environment variables, then command-line flags.
"#)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a checkpoint with the external tool
    #[command(alias = "conv")]
    Convert(ConvertCommand),

    /// Write the normalized f32 archive and keep it
    Export(ExportCommand),

    /// List tensor names, precisions and shapes
    Inspect(InspectCommand),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn main() {
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(()) => exit::EXIT_SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            for cause in err.chain().skip(1) {
                eprintln!("  Caused by: {cause}");
            }
            exit::code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Config { action: ConfigAction::Default } = cli.command {
        return commands::config::print_default();
    }

    let config_file = resolve_config_file(cli.config.as_deref());
    let builder = load_configuration(config_file.as_deref())?.log_level(cli.log_level.clone());

    let builder = match &cli.command {
        Commands::Convert(cmd) => cmd.configure(builder),
        Commands::Export(cmd) => cmd.configure(builder),
        Commands::Inspect(_) | Commands::Config { .. } => builder,
    };
    let config = builder.build().context("Invalid configuration")?;

    logging::init(&config.logging)?;
    if let Some(path) = &config_file {
        debug!("Loaded configuration from {}", path.display());
    }

    match cli.command {
        Commands::Convert(cmd) => cmd.execute(config),
        Commands::Export(cmd) => cmd.execute(config),
        Commands::Inspect(cmd) => cmd.execute(),
        Commands::Config { action } => {
            commands::config::execute(action, &config, config_file.as_deref())
        }
    }
}

/// The explicit `--config` path, else `ckpt-convert.toml` in the working directory if present.
fn resolve_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            default.is_file().then(|| default.to_path_buf())
        }
    }
}

/// Defaults, then the configuration file, then `CKPT_CONVERT_*` overrides.
fn load_configuration(file: Option<&Path>) -> Result<ConfigBuilder> {
    let builder = match file {
        Some(path) => ConfigBuilder::new()
            .with_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => ConfigBuilder::new(),
    };
    builder.with_env().context("Invalid environment override")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tool_args_accept_leading_hyphens() {
        let cli = Cli::try_parse_from([
            "ckpt-convert",
            "convert",
            "--tool",
            "sh",
            "--tool-arg",
            "-c",
            "--tool-arg",
            "exit 0",
        ])
        .unwrap();
        let Commands::Convert(cmd) = cli.command else { panic!("expected convert") };
        assert_eq!(cmd.tool.as_deref(), Some("sh"));
        assert_eq!(cmd.tool_args, ["-c", "exit 0"]);
    }

    #[test]
    fn format_flag_parses_checkpoint_format() {
        let args = ["ckpt-convert", "inspect", "weights.st", "--format", "safetensors"];
        let cli = Cli::try_parse_from(args).unwrap();
        let Commands::Inspect(cmd) = cli.command else { panic!("expected inspect") };
        assert_eq!(cmd.format, Some(ckpt_convert::CheckpointFormat::SafeTensors));
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ckpt-convert",
            "convert",
            "--log-level",
            "debug",
            "--config",
            "alt.toml",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
    }

    #[test]
    fn flags_layer_over_model_dir() {
        let cli = Cli::try_parse_from([
            "ckpt-convert",
            "convert",
            "--model-dir",
            "/models/fairy",
            "--output",
            "/out/model.ot",
            "--no-progress",
        ])
        .unwrap();
        let Commands::Convert(cmd) = cli.command else { panic!("expected convert") };
        let config = cmd.configure(ConfigBuilder::new()).build().unwrap();
        assert_eq!(config.source_path, PathBuf::from("/models/fairy/pytorch_model.bin"));
        assert_eq!(config.target_path, PathBuf::from("/out/model.ot"));
        assert!(!config.progress);
    }
}
