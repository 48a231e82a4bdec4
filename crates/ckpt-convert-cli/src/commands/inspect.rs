//! Checkpoint inspection command

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use ckpt_convert::{CheckpointFormat, TensorSummary};
use clap::Args;

/// Inspect command arguments
#[derive(Args, Debug)]
pub struct InspectCommand {
    /// Checkpoint file
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Source format (pytorch, safetensors, npz)
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<CheckpointFormat>,

    /// Output format as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl InspectCommand {
    pub fn execute(&self) -> Result<()> {
        let summaries = ckpt_convert::inspect(&self.path, self.format)
            .with_context(|| format!("Failed to inspect {}", self.path.display()))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        } else {
            print!("{}", render_table(&summaries));
        }
        Ok(())
    }
}

fn render_table(summaries: &[TensorSummary]) -> String {
    let width = summaries.iter().map(|s| s.name.len()).chain([4]).max().unwrap_or(4);
    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  {:<5}  SHAPE", "NAME", "DTYPE");
    for s in summaries {
        let _ = writeln!(out, "{:<width$}  {:<5}  {:?}", s.name, s.dtype, s.shape);
    }
    let parameters: usize = summaries.iter().map(|s| s.elem_count).sum();
    let _ = writeln!(out, "{} tensors, {} parameters", summaries.len(), parameters);
    out
}
