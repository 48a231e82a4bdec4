//! Checkpoint conversion pipeline.
//!
//! load -> normalize to f32 -> tie `lm_head.weight` -> write the `.npz`
//! archive -> run the external tool -> delete the archive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::IntermediateArchive;
use crate::config::{ConfigError, ConverterConfig, same_path};
use crate::error::{ConvertError, Result};
use crate::normalize::{normalize_precision, tie_embeddings};
use crate::params::{ParameterMap, TensorSummary};
use crate::reader::{CheckpointFormat, load_checkpoint};
use crate::tool::ExternalTool;

/// Summary of one conversion or export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    pub source: PathBuf,
    pub source_format: CheckpointFormat,
    /// Artifact produced: the tool's target, or the kept archive on export.
    pub target: PathBuf,
    pub archive: PathBuf,
    pub tensors: usize,
    pub parameters: usize,
    /// Tensor count per source precision.
    pub source_dtypes: BTreeMap<String, usize>,
    pub tied_embeddings: bool,
    /// `None` for exports, which do not run a tool.
    pub tool: Option<String>,
    pub elapsed_ms: u64,
    pub converter_version: String,
}

impl ConversionReport {
    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConvertError::io(path, std::io::Error::other(e)))?;
        std::fs::write(path, json).map_err(|e| ConvertError::io(path, e))
    }
}

/// Parameters ready for archiving, plus what the run learned on the way.
struct Prepared {
    format: CheckpointFormat,
    params: ParameterMap,
    source_dtypes: BTreeMap<String, usize>,
    tied: bool,
}

/// Runs conversions for one [`ConverterConfig`].
#[derive(Debug, Clone)]
pub struct Converter {
    config: ConverterConfig,
}

impl Converter {
    /// Validates `config` up front. Archive placement is checked by
    /// [`convert`](Self::convert), since [`export`](Self::export) writes elsewhere.
    pub fn new(config: ConverterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    fn prepare(&self) -> Result<Prepared> {
        info!("Loading weights");
        let (format, params) =
            load_checkpoint(&self.config.source_path, self.config.source_format)?;
        let source_dtypes = params.dtype_histogram();

        info!("Processing weights ({} tensors)", params.len());
        let mut params = normalize_precision(params, self.config.progress)?;
        let tied = tie_embeddings(&mut params)?;

        Ok(Prepared { format, params, source_dtypes, tied })
    }

    fn report(
        &self,
        prepared: &Prepared,
        target: &Path,
        archive: &Path,
        tool: Option<&ExternalTool>,
        started: Instant,
    ) -> ConversionReport {
        ConversionReport {
            source: self.config.source_path.clone(),
            source_format: prepared.format,
            target: target.to_path_buf(),
            archive: archive.to_path_buf(),
            tensors: prepared.params.len(),
            parameters: prepared.params.parameter_count(),
            source_dtypes: prepared.source_dtypes.clone(),
            tied_embeddings: prepared.tied,
            tool: tool.map(|t| t.program().to_string()),
            elapsed_ms: started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
            converter_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Convert the configured source into the configured target.
    ///
    /// The intermediate archive is deleted whether or not the tool succeeds.
    /// When both the tool and the deletion fail, the tool error is returned.
    pub fn convert(&self) -> Result<ConversionReport> {
        self.config.validate_conversion()?;
        let started = Instant::now();
        let prepared = self.prepare()?;

        let archive_path = self.config.intermediate_path();
        info!("Saving archive: {}", archive_path.display());
        let archive = IntermediateArchive::create(&prepared.params, &archive_path)?;

        let tool = ExternalTool::from_config(&self.config.tool);
        info!("Converting weights");
        let outcome = tool.run(archive.path(), &self.config.target_path);
        let cleanup = archive.remove();

        match (outcome, cleanup) {
            (Err(err), Err(cleanup_err)) => {
                warn!("Intermediate archive cleanup also failed: {}", cleanup_err);
                return Err(err);
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => return Err(err),
            (Ok(()), Ok(())) => {}
        }

        debug!(
            "Target {} exists: {}",
            self.config.target_path.display(),
            self.config.target_path.exists()
        );
        let report =
            self.report(&prepared, &self.config.target_path, &archive_path, Some(&tool), started);
        info!(
            "Conversion complete: {} tensors, {} parameters in {} ms",
            report.tensors, report.parameters, report.elapsed_ms
        );
        Ok(report)
    }

    /// Write the normalized, tied archive to `archive_path` and keep it.
    ///
    /// No external tool runs.
    pub fn export(&self, archive_path: &Path) -> Result<ConversionReport> {
        if same_path(archive_path, &self.config.source_path) {
            return Err(ConvertError::Config(ConfigError::Validation(format!(
                "export archive {} would overwrite the source checkpoint",
                archive_path.display()
            ))));
        }

        let started = Instant::now();
        let prepared = self.prepare()?;

        if let Some(parent) = archive_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConvertError::io(parent, e))?;
        }

        info!("Saving archive: {}", archive_path.display());
        let kept = IntermediateArchive::create(&prepared.params, archive_path)?.keep();

        let report = self.report(&prepared, &kept, &kept, None, started);
        info!("Export complete: {} tensors", report.tensors);
        Ok(report)
    }
}

/// Convert `source` into `target` with the default tool and archive location.
pub fn convert(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Result<ConversionReport> {
    Converter::new(ConverterConfig::new(source, target))?.convert()
}

/// Name, precision and shape of every tensor in a checkpoint.
pub fn inspect(path: &Path, format: Option<CheckpointFormat>) -> Result<Vec<TensorSummary>> {
    let (_, params) = load_checkpoint(path, format)?;
    Ok(params.summaries())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_archive;
    use candle_core::{Device, Tensor};
    use tempfile::TempDir;

    fn write_source(dir: &Path, entries: Vec<(&str, Vec<f32>)>) -> PathBuf {
        let path = dir.join("source.npz");
        let tensors: Vec<(String, Tensor)> = entries
            .into_iter()
            .map(|(name, values)| {
                (name.to_string(), Tensor::new(values.as_slice(), &Device::Cpu).unwrap())
            })
            .collect();
        Tensor::write_npz(&tensors, &path).unwrap();
        path
    }

    fn config(source: &Path, target: &Path) -> ConverterConfig {
        let mut config = ConverterConfig::new(source, target);
        config.progress = false;
        config
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut cfg = ConverterConfig::new("dir/pytorch_model.bin", "dir/model.ot");
        cfg.tool.program = String::new();
        let err = Converter::new(cfg).unwrap_err();
        assert!(matches!(err, ConvertError::Config(_)));
    }

    #[test]
    fn convert_rejects_archive_at_target_before_loading() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), vec![("wte.weight", vec![1.0])]);
        let target = dir.path().join("model.npz");
        let mut cfg = config(&source, &target);
        cfg.tool.program = "cp".into();

        let err = Converter::new(cfg).unwrap().convert().unwrap_err();
        assert!(matches!(err, ConvertError::Config(ConfigError::Validation(_))));
        assert!(!target.exists());
    }

    #[test]
    fn export_accepts_source_named_like_the_archive() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("model.npz");
        let t = Tensor::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        Tensor::write_npz(&[("wte.weight", &t)], &source).unwrap();
        let out = dir.path().join("f32.npz");

        let converter = Converter::new(config(&source, &dir.path().join("model.ot"))).unwrap();
        let report = converter.export(&out).unwrap();
        assert_eq!(report.tensors, 2);
        assert!(source.exists());
        assert!(out.exists());
    }

    #[test]
    fn export_keeps_tied_archive() {
        let dir = TempDir::new().unwrap();
        let source = write_source(
            dir.path(),
            vec![("wte.weight", vec![1.0, 2.0]), ("ln.bias", vec![0.5])],
        );
        let out = dir.path().join("out").join("weights.npz");

        let converter = Converter::new(config(&source, &dir.path().join("model.ot"))).unwrap();
        let report = converter.export(&out).unwrap();

        assert!(out.exists());
        assert_eq!(report.tensors, 3);
        assert_eq!(report.parameters, 5);
        assert!(report.tied_embeddings);
        assert_eq!(report.tool, None);
        assert_eq!(report.source_dtypes.get("f32"), Some(&2));

        let archive = read_archive(&out).unwrap();
        assert_eq!(
            archive.names().collect::<Vec<_>>(),
            ["wte.weight", "lm_head.weight", "ln.bias"]
        );
    }

    #[test]
    fn export_refuses_to_overwrite_source() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), vec![("ln.bias", vec![0.5])]);
        let converter = Converter::new(config(&source, &dir.path().join("model.ot"))).unwrap();
        let err = converter.export(&source).unwrap_err();
        assert!(err.to_string().contains("would overwrite the source"));
    }

    #[test]
    fn load_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("pytorch_model.bin");
        let converter = Converter::new(config(&source, &dir.path().join("model.ot"))).unwrap();

        let err = converter.convert().unwrap_err();
        assert!(matches!(err, ConvertError::Load { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn inspect_lists_entries_in_order() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), vec![("b", vec![1.0, 2.0, 3.0]), ("a", vec![4.0])]);
        let summaries = inspect(&source, None).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "b");
        assert_eq!(summaries[0].shape, vec![3]);
        assert_eq!(summaries[1].dtype, "f32");
    }

    #[cfg(unix)]
    #[test]
    fn convert_runs_tool_and_removes_archive() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), vec![("wte.weight", vec![1.0, 2.0])]);
        let target = dir.path().join("model.ot");
        let mut cfg = config(&source, &target);
        cfg.tool.program = "cp".into();

        let report = Converter::new(cfg).unwrap().convert().unwrap();
        assert_eq!(report.archive, dir.path().join("model.npz"));
        assert!(!report.archive.exists());
        assert!(target.exists());
        assert_eq!(report.tool.as_deref(), Some("cp"));

        let report_path = dir.path().join("model.ot.meta.json");
        report.write_json(&report_path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(json["tensors"], 2);
        assert_eq!(json["source_format"], "npz");
        assert_eq!(json["tied_embeddings"], true);
    }
}
