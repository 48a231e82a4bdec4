//! Error types for checkpoint conversion.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors produced while converting a checkpoint.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The source checkpoint is missing, unreadable, or not a parameter mapping.
    #[error("failed to load checkpoint {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// The external conversion tool exited with a non-zero status.
    ///
    /// `code` is `None` when the process was terminated by a signal.
    #[error("conversion tool `{program}` failed with {}", describe_code(*code))]
    ConversionTool { program: String, code: Option<i32> },

    /// The external conversion tool could not be started.
    #[error("failed to launch conversion tool `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external conversion tool did not finish within the configured bound.
    #[error("conversion tool `{program}` timed out after {}s", timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },

    /// Writing, reading or deleting a file on disk failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing the intermediate archive failed.
    #[error("failed to write archive {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    /// A tensor operation (cast, copy) failed.
    #[error("tensor `{name}`: {source}")]
    Tensor {
        name: String,
        #[source]
        source: candle_core::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl ConvertError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Load { path: path.into(), reason: reason.to_string() }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn tensor(name: impl Into<String>, source: candle_core::Error) -> Self {
        Self::Tensor { name: name.into(), source }
    }

    /// Exit code reported by the conversion tool, if this is a tool failure.
    pub fn tool_exit_code(&self) -> Option<i32> {
        match self {
            Self::ConversionTool { code, .. } => *code,
            _ => None,
        }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ConvertError>;
