//! Converter configuration.
//!
//! Loads [`ConverterConfig`] from a TOML file (`ckpt-convert.toml`) with
//! environment variable overrides via `CKPT_CONVERT_*` prefixed variables.
//! [`ConfigBuilder`] layers file, environment and explicit overrides in that
//! order and validates the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reader::CheckpointFormat;

/// Default source checkpoint file name inside a model directory.
pub const DEFAULT_SOURCE_FILE: &str = "pytorch_model.bin";
/// Default target artifact file name inside a model directory.
pub const DEFAULT_TARGET_FILE: &str = "model.ot";
/// File name of the intermediate archive, placed next to the source.
pub const INTERMEDIATE_FILE_NAME: &str = "model.npz";
/// Default external conversion tool.
pub const DEFAULT_TOOL: &str = "convert-tensor";
/// Conventional configuration file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ckpt-convert.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// External conversion tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Program to run (looked up on `PATH` unless it contains a separator).
    /// Override: `CKPT_CONVERT_TOOL`
    pub program: String,

    /// Leading arguments placed before the archive and target paths.
    /// Override: `CKPT_CONVERT_TOOL_ARGS` (whitespace separated)
    pub args: Vec<String>,

    /// Upper bound on the tool's run time; unbounded when absent.
    /// Override: `CKPT_CONVERT_TOOL_TIMEOUT_SECS`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self { program: DEFAULT_TOOL.to_string(), args: Vec::new(), timeout_secs: None }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Logging settings consumed by the command-line front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `ckpt_convert=debug`.
    /// Override: `CKPT_CONVERT_LOG_LEVEL`
    pub level: String,

    /// Override: `CKPT_CONVERT_LOG_FORMAT`
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

/// Everything one conversion run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Source checkpoint.
    /// Override: `CKPT_CONVERT_SOURCE`
    pub source_path: PathBuf,

    /// Artifact the external tool should produce.
    /// Override: `CKPT_CONVERT_TARGET`
    pub target_path: PathBuf,

    /// Intermediate archive location; defaults to [`INTERMEDIATE_FILE_NAME`]
    /// next to the source.
    /// Override: `CKPT_CONVERT_INTERMEDIATE`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate_path: Option<PathBuf>,

    /// Source format; detected from the file extension when absent.
    /// Override: `CKPT_CONVERT_SOURCE_FORMAT`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_format: Option<CheckpointFormat>,

    /// Draw a progress bar while normalizing tensors.
    /// Override: `CKPT_CONVERT_PROGRESS`
    pub progress: bool,

    pub tool: ToolConfig,

    pub logging: LoggingConfig,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from(DEFAULT_SOURCE_FILE),
            target_path: PathBuf::from(DEFAULT_TARGET_FILE),
            intermediate_path: None,
            source_format: None,
            progress: true,
            tool: ToolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Errors that can occur when loading or validating a [`ConverterConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render TOML: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl ConverterConfig {
    /// Configuration for converting `source` into `target` with defaults
    /// for everything else.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self { source_path: source.into(), target_path: target.into(), ..Self::default() }
    }

    /// Configuration for the conventional layout of a model directory:
    /// `DIR/pytorch_model.bin` converted into `DIR/model.ot`.
    pub fn for_model_dir(dir: &Path) -> Self {
        Self::new(dir.join(DEFAULT_SOURCE_FILE), dir.join(DEFAULT_TARGET_FILE))
    }

    /// Resolved intermediate archive path.
    pub fn intermediate_path(&self) -> PathBuf {
        match &self.intermediate_path {
            Some(path) => path.clone(),
            None => self
                .source_path
                .parent()
                .map(|dir| dir.join(INTERMEDIATE_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(INTERMEDIATE_FILE_NAME)),
        }
    }

    /// Render this configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate a default configuration TOML string.
    pub fn default_toml() -> Result<String, ConfigError> {
        Self::default().to_toml()
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    /// Load from TOML string (useful for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: ConverterConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration, returning an error with a descriptive
    /// message on failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("source_path must not be empty".into()));
        }
        if self.target_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("target_path must not be empty".into()));
        }
        if let Some(path) = &self.intermediate_path
            && path.as_os_str().is_empty()
        {
            return Err(ConfigError::Validation("intermediate_path must not be empty".into()));
        }
        if self.tool.program.trim().is_empty() {
            return Err(ConfigError::Validation("tool.program must not be empty".into()));
        }
        if self.tool.timeout_secs == Some(0) {
            return Err(ConfigError::Validation("tool.timeout_secs must be > 0".into()));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation("logging.level must not be empty".into()));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the checks that only matter when the
    /// intermediate archive is written: it must not land on the source
    /// checkpoint or on the tool's target.
    pub fn validate_conversion(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let archive = self.intermediate_path();
        if same_path(&archive, &self.source_path) {
            return Err(ConfigError::Validation(format!(
                "intermediate archive {} would overwrite the source checkpoint",
                archive.display()
            )));
        }
        if same_path(&archive, &self.target_path) {
            return Err(ConfigError::Validation(format!(
                "intermediate archive {} is also target_path; the tool output would be deleted",
                archive.display()
            )));
        }
        Ok(())
    }

    /// Apply `CKPT_CONVERT_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("CKPT_CONVERT_SOURCE") {
            self.source_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_TARGET") {
            self.target_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_INTERMEDIATE") {
            self.intermediate_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_SOURCE_FORMAT") {
            self.source_format =
                Some(val.parse::<CheckpointFormat>().map_err(|reason| {
                    ConfigError::EnvOverride {
                        key: "CKPT_CONVERT_SOURCE_FORMAT".into(),
                        value: val.clone(),
                        reason,
                    }
                })?);
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_TOOL") {
            self.tool.program = val;
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_TOOL_ARGS") {
            self.tool.args = val.split_whitespace().map(str::to_string).collect();
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_TOOL_TIMEOUT_SECS") {
            self.tool.timeout_secs =
                Some(val.parse::<u64>().map_err(|e| ConfigError::EnvOverride {
                    key: "CKPT_CONVERT_TOOL_TIMEOUT_SECS".into(),
                    value: val.clone(),
                    reason: e.to_string(),
                })?);
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_PROGRESS") {
            self.progress = matches!(val.as_str(), "1" | "true" | "yes");
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("CKPT_CONVERT_LOG_FORMAT") {
            self.logging.format =
                val.parse::<LogFormat>().map_err(|reason| ConfigError::EnvOverride {
                    key: "CKPT_CONVERT_LOG_FORMAT".into(),
                    value: val.clone(),
                    reason,
                })?;
        }

        Ok(())
    }
}

/// Lexical comparison after anchoring relative paths at the working directory.
pub(crate) fn same_path(a: &Path, b: &Path) -> bool {
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Layers configuration sources: defaults, then file, then environment,
/// then explicit overrides. `None` overrides leave the current value alone.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: ConverterConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current values with the contents of a TOML file.
    pub fn with_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        self.config = toml::from_str(&contents)?;
        Ok(self)
    }

    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        self.config.apply_env_overrides()?;
        Ok(self)
    }

    /// Point source and target at the conventional files inside `dir`.
    pub fn model_dir(mut self, dir: Option<&Path>) -> Self {
        if let Some(dir) = dir {
            self.config.source_path = dir.join(DEFAULT_SOURCE_FILE);
            self.config.target_path = dir.join(DEFAULT_TARGET_FILE);
        }
        self
    }

    pub fn source_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.config.source_path = path;
        }
        self
    }

    pub fn target_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.config.target_path = path;
        }
        self
    }

    pub fn intermediate_path(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.config.intermediate_path = path;
        }
        self
    }

    pub fn source_format(mut self, format: Option<CheckpointFormat>) -> Self {
        if format.is_some() {
            self.config.source_format = format;
        }
        self
    }

    pub fn tool_program(mut self, program: Option<String>) -> Self {
        if let Some(program) = program {
            self.config.tool.program = program;
        }
        self
    }

    /// Replace the tool's leading arguments; an empty list keeps the current ones.
    pub fn tool_args(mut self, args: Vec<String>) -> Self {
        if !args.is_empty() {
            self.config.tool.args = args;
        }
        self
    }

    pub fn timeout_secs(mut self, secs: Option<u64>) -> Self {
        if secs.is_some() {
            self.config.tool.timeout_secs = secs;
        }
        self
    }

    pub fn progress(mut self, progress: Option<bool>) -> Self {
        if let Some(progress) = progress {
            self.config.progress = progress;
        }
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        if let Some(level) = level {
            self.config.logging.level = level;
        }
        self
    }

    /// Validate and return the layered configuration.
    pub fn build(self) -> Result<ConverterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
