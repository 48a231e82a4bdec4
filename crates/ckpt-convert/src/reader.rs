//! Checkpoint readers.
//!
//! Each supported source format has a [`CheckpointReader`]. The format is
//! forced through configuration or detected from the file extension.

use std::path::Path;

use candle_core::{Device, Tensor};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConvertError, Result};
use crate::params::ParameterMap;

/// Supported source checkpoint formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointFormat {
    /// PyTorch `torch.save` archive (`pytorch_model.bin`, `.pt`, `.pth`).
    PyTorch,
    SafeTensors,
    /// NumPy `.npz` archive.
    Npz,
}

impl CheckpointFormat {
    pub const ALL: [Self; 3] = [Self::PyTorch, Self::SafeTensors, Self::Npz];

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::PyTorch => &["bin", "pt", "pth", "ckpt"],
            Self::SafeTensors => &["safetensors"],
            Self::Npz => &["npz"],
        }
    }

    /// Guess the format from the file extension (case-insensitive).
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        Self::ALL.into_iter().find(|format| format.extensions().contains(&ext.as_str()))
    }

    pub fn reader(self) -> Box<dyn CheckpointReader> {
        match self {
            Self::PyTorch => Box::new(PyTorchReader),
            Self::SafeTensors => Box::new(SafeTensorsReader),
            Self::Npz => Box::new(NpzReader),
        }
    }
}

impl std::fmt::Display for CheckpointFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PyTorch => write!(f, "pytorch"),
            Self::SafeTensors => write!(f, "safetensors"),
            Self::Npz => write!(f, "npz"),
        }
    }
}

impl std::str::FromStr for CheckpointFormat {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pytorch" | "torch" | "pt" => Ok(Self::PyTorch),
            "safetensors" | "st" => Ok(Self::SafeTensors),
            "npz" | "numpy" => Ok(Self::Npz),
            other => Err(format!("unknown checkpoint format: {other}")),
        }
    }
}

/// Format-specific checkpoint reader.
pub trait CheckpointReader {
    fn name(&self) -> &'static str;
    fn format(&self) -> CheckpointFormat;
    /// Whether `path` carries one of this reader's extensions.
    fn can_read(&self, path: &Path) -> bool {
        CheckpointFormat::detect(path) == Some(self.format())
    }
    /// Read every tensor of the checkpoint at `path`, in file order.
    fn read(&self, path: &Path) -> Result<ParameterMap>;
}

/// PyTorch pickle checkpoints, read through candle's unpickler.
pub struct PyTorchReader;

impl CheckpointReader for PyTorchReader {
    fn name(&self) -> &'static str {
        "PyTorch"
    }

    fn format(&self) -> CheckpointFormat {
        CheckpointFormat::PyTorch
    }

    fn read(&self, path: &Path) -> Result<ParameterMap> {
        let tensors = candle_core::pickle::read_all(path).map_err(|e| ConvertError::load(path, e))?;
        Ok(ParameterMap::from_entries(tensors))
    }
}

/// SafeTensors files. The header supplies the on-disk order, candle the
/// tensors.
pub struct SafeTensorsReader;

impl CheckpointReader for SafeTensorsReader {
    fn name(&self) -> &'static str {
        "SafeTensors"
    }

    fn format(&self) -> CheckpointFormat {
        CheckpointFormat::SafeTensors
    }

    fn read(&self, path: &Path) -> Result<ParameterMap> {
        let buffer = std::fs::read(path).map_err(|e| ConvertError::load(path, e))?;

        let (_, metadata) =
            SafeTensors::read_metadata(&buffer).map_err(|e| ConvertError::load(path, e))?;
        let mut order: Vec<(usize, String)> = metadata
            .tensors()
            .into_iter()
            .map(|(name, info)| (info.data_offsets.0, name))
            .collect();
        order.sort();

        let mut tensors = candle_core::safetensors::load_buffer(&buffer, &Device::Cpu)
            .map_err(|e| ConvertError::load(path, e))?;

        let mut map = ParameterMap::new();
        for (_, name) in order {
            let tensor = tensors
                .remove(&name)
                .ok_or_else(|| ConvertError::load(path, format!("tensor `{name}` missing")))?;
            map.insert(name, tensor);
        }
        Ok(map)
    }
}

/// NumPy `.npz` archives.
pub struct NpzReader;

impl CheckpointReader for NpzReader {
    fn name(&self) -> &'static str {
        "NumPy archive"
    }

    fn format(&self) -> CheckpointFormat {
        CheckpointFormat::Npz
    }

    fn read(&self, path: &Path) -> Result<ParameterMap> {
        let tensors = Tensor::read_npz(path).map_err(|e| ConvertError::load(path, e))?;
        Ok(ParameterMap::from_entries(tensors))
    }
}

/// Load the full parameter mapping at `path`.
///
/// `format` forces a reader; otherwise the extension decides. A checkpoint
/// that holds no tensors is rejected.
pub fn load_checkpoint(
    path: &Path,
    format: Option<CheckpointFormat>,
) -> Result<(CheckpointFormat, ParameterMap)> {
    if !path.exists() {
        return Err(ConvertError::load(path, "file not found"));
    }
    if !path.is_file() {
        return Err(ConvertError::load(path, "not a regular file"));
    }

    let format = match format {
        Some(format) => format,
        None => CheckpointFormat::detect(path).ok_or_else(|| {
            ConvertError::load(path, "unrecognized checkpoint extension; set the source format")
        })?,
    };
    let reader = format.reader();
    if !reader.can_read(path) {
        debug!("Reading {} as {} regardless of its extension", path.display(), format);
    }

    info!("Loading {} checkpoint: {}", reader.name(), path.display());
    let params = reader.read(path)?;
    if params.is_empty() {
        return Err(ConvertError::load(path, "checkpoint contains no tensors"));
    }

    debug!("Loaded {} tensors ({} parameters)", params.len(), params.parameter_count());
    Ok((format, params))
}
