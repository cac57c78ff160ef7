use std::fs;
use std::path::{Path, PathBuf};

use freshpack_core::{UpdateError, UpdateResult};

/// Directory layout under one application's base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLayout {
    base: PathBuf,
}

/// The three directories one install touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub staging_dir: PathBuf,
    pub install_root: PathBuf,
    pub backup_dir: PathBuf,
}

impl AppLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.base.join("downloads")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base.join("tools")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base.join("state")
    }

    pub fn archive_path(&self, zip_name: &str) -> PathBuf {
        self.downloads_dir().join(zip_name)
    }

    pub fn install_root(&self, extract_name: &str) -> PathBuf {
        self.tools_dir().join(extract_name)
    }

    pub fn staging_dir(&self, extract_name: &str) -> PathBuf {
        self.tools_dir().join(format!(".{extract_name}.extract"))
    }

    pub fn backup_dir(&self, extract_name: &str) -> PathBuf {
        self.tools_dir().join(format!(".{extract_name}.previous"))
    }

    pub fn install_paths(&self, extract_name: &str) -> InstallPaths {
        InstallPaths {
            staging_dir: self.staging_dir(extract_name),
            install_root: self.install_root(extract_name),
            backup_dir: self.backup_dir(extract_name),
        }
    }

    pub fn receipt_path(&self, app: &str) -> PathBuf {
        self.state_dir()
            .join(format!("{}.receipt", state_file_stem(app)))
    }

    pub fn lock_path(&self, app: &str) -> PathBuf {
        self.state_dir().join(format!("{}.lock", state_file_stem(app)))
    }

    pub fn ensure_base_dirs(&self) -> UpdateResult<()> {
        for dir in [self.downloads_dir(), self.tools_dir(), self.state_dir()] {
            fs::create_dir_all(&dir).map_err(UpdateError::io("create", &dir))?;
        }
        Ok(())
    }
}

fn state_file_stem(app: &str) -> String {
    app.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
