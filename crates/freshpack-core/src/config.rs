use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MANIFEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything one update run needs to know, passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    pub manifest_url: String,
    pub app_name: String,
    /// Per-application base holding `downloads/`, `tools/` and `state/`.
    pub base_dir: PathBuf,
    pub manifest_timeout: Duration,
    pub download_timeout: Duration,
}

impl UpdaterConfig {
    pub fn new(
        manifest_url: impl Into<String>,
        app_name: impl Into<String>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            app_name: app_name.into(),
            base_dir: base_dir.into(),
            manifest_timeout: DEFAULT_MANIFEST_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// On-disk TOML form. Every key is optional so command-line flags can fill
/// the gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpdaterConfigFile {
    pub manifest_url: Option<String>,
    pub app_name: Option<String>,
    pub base_dir: Option<PathBuf>,
    pub manifest_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
}

impl UpdaterConfigFile {
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    /// Applies values from `other` over this file's values.
    pub fn overlay(self, other: Self) -> Self {
        Self {
            manifest_url: other.manifest_url.or(self.manifest_url),
            app_name: other.app_name.or(self.app_name),
            base_dir: other.base_dir.or(self.base_dir),
            manifest_timeout_secs: other.manifest_timeout_secs.or(self.manifest_timeout_secs),
            download_timeout_secs: other.download_timeout_secs.or(self.download_timeout_secs),
        }
    }
}
