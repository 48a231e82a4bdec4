//! Archive export command

use std::path::PathBuf;

use anyhow::{Context, Result};
use ckpt_convert::{CheckpointFormat, ConfigBuilder, Converter, ConverterConfig};
use clap::Args;
use tracing::info;

/// Export command arguments
#[derive(Args, Debug)]
pub struct ExportCommand {
    /// Source checkpoint [default: pytorch_model.bin]
    #[arg(short, long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Archive to write and keep
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,

    /// Source format (pytorch, safetensors, npz)
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<CheckpointFormat>,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl ExportCommand {
    pub fn configure(&self, builder: ConfigBuilder) -> ConfigBuilder {
        builder
            .source_path(self.input.clone())
            .source_format(self.format)
            .progress(self.no_progress.then_some(false))
    }

    pub fn execute(&self, config: ConverterConfig) -> Result<()> {
        let report = Converter::new(config)?.export(&self.output).context("Export failed")?;
        info!("Wrote {} tensors to {}", report.tensors, report.target.display());
        println!("{}", report.target.display());
        Ok(())
    }
}
