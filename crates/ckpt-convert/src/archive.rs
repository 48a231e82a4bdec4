//! Intermediate NumPy archive.
//!
//! [`IntermediateArchive`] owns the `.npz` file between serialization and
//! the end of the external tool run. [`IntermediateArchive::remove`] deletes
//! it and reports failures; dropping an archive that was neither removed nor
//! kept deletes it best-effort.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::params::ParameterMap;

/// Serialize `params` to an `.npz` archive at `path`, in map order.
pub fn write_archive(params: &ParameterMap, path: &Path) -> Result<()> {
    Tensor::write_npz(params.entries(), path)
        .map_err(|e| ConvertError::Archive { path: path.to_path_buf(), reason: e.to_string() })
}

/// Read an `.npz` archive back into a parameter mapping.
pub fn read_archive(path: &Path) -> Result<ParameterMap> {
    let tensors = Tensor::read_npz(path).map_err(|e| ConvertError::load(path, e))?;
    Ok(ParameterMap::from_entries(tensors))
}

/// Scoped ownership of the intermediate archive file.
#[derive(Debug)]
pub struct IntermediateArchive {
    path: PathBuf,
    armed: bool,
}

impl IntermediateArchive {
    /// Write `params` to `path` and take ownership of the file.
    ///
    /// A partially written file is deleted before the error is returned.
    pub fn create(params: &ParameterMap, path: &Path) -> Result<Self> {
        if path.exists() {
            warn!("Overwriting existing intermediate archive: {}", path.display());
        }
        let archive = Self { path: path.to_path_buf(), armed: true };
        write_archive(params, path)?;
        debug!("Wrote {} tensors to {}", params.len(), path.display());
        Ok(archive)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the archive. A file that is already gone counts as deleted.
    pub fn remove(mut self) -> Result<()> {
        self.armed = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed intermediate archive: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Intermediate archive already gone: {}", self.path.display());
                Ok(())
            }
            Err(e) => Err(ConvertError::io(&self.path, e)),
        }
    }

    /// Release ownership and leave the file on disk.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for IntermediateArchive {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Cleaned up intermediate archive: {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clean up {}: {}", self.path.display(), e),
        }
    }
}
