use std::path::{Path, PathBuf};

use freshpack_core::{UpdateError, UpdateResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallValidator;

impl InstallValidator {
    pub fn new() -> Self {
        Self
    }

    /// Resolves the executable under `install_root` and checks it exists.
    ///
    /// The returned path is absolute. Nothing on disk is modified.
    pub fn validate(&self, install_root: &Path, executable_rel: &Path) -> UpdateResult<PathBuf> {
        let joined = install_root.join(executable_rel);
        let resolved = std::path::absolute(&joined).map_err(UpdateError::io("resolve", &joined))?;

        let exists = resolved
            .try_exists()
            .map_err(UpdateError::io("stat", &resolved))?;
        if !exists {
            return Err(UpdateError::Validation { path: resolved });
        }

        tracing::debug!(executable = %resolved.display(), "validated install");
        Ok(resolved)
    }
}
