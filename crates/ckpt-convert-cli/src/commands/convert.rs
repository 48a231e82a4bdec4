//! Checkpoint conversion command

use std::path::PathBuf;

use anyhow::{Context, Result};
use ckpt_convert::{CheckpointFormat, ConfigBuilder, Converter, ConverterConfig};
use clap::Args;
use tracing::info;

/// Convert command arguments
#[derive(Args, Debug)]
pub struct ConvertCommand {
    /// Source checkpoint [default: pytorch_model.bin]
    #[arg(short, long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Artifact the conversion tool writes [default: model.ot]
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Model directory: converts DIR/pytorch_model.bin into DIR/model.ot
    ///
    /// --input and --output still take precedence.
    #[arg(short = 'd', long, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    /// Intermediate archive [default: model.npz next to the source]
    #[arg(long, value_name = "PATH")]
    pub intermediate: Option<PathBuf>,

    /// Source format (pytorch, safetensors, npz); detected from the extension when omitted
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<CheckpointFormat>,

    /// External conversion tool [default: convert-tensor]
    #[arg(long, value_name = "PROGRAM")]
    pub tool: Option<String>,

    /// Argument passed to the tool before the archive and target paths (repeatable)
    #[arg(long = "tool-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub tool_args: Vec<String>,

    /// Kill the tool if it runs longer than this
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Write a JSON conversion report
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl ConvertCommand {
    /// Layer this command's flags over the file and environment configuration.
    pub fn configure(&self, builder: ConfigBuilder) -> ConfigBuilder {
        builder
            .model_dir(self.model_dir.as_deref())
            .source_path(self.input.clone())
            .target_path(self.output.clone())
            .intermediate_path(self.intermediate.clone())
            .source_format(self.format)
            .tool_program(self.tool.clone())
            .tool_args(self.tool_args.clone())
            .timeout_secs(self.timeout_secs)
            .progress(self.no_progress.then_some(false))
    }

    pub fn execute(&self, config: ConverterConfig) -> Result<()> {
        info!("Source: {}", config.source_path.display());
        info!("Target: {}", config.target_path.display());

        let report = Converter::new(config)?.convert().context("Conversion failed")?;

        if let Some(path) = &self.report {
            report
                .write_json(path)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Report: {}", path.display());
        }
        Ok(())
    }
}
