use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use freshpack_core::{UpdaterConfig, UpdaterConfigFile};

pub(crate) const CONFIG_ENV_VAR: &str = "FRESHPACK_CONFIG";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigOverrides {
    pub(crate) config_path: Option<PathBuf>,
    pub(crate) manifest_url: Option<String>,
    pub(crate) app_name: Option<String>,
    pub(crate) base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub(crate) config: UpdaterConfig,
    /// The TOML file that contributed values, if any.
    pub(crate) source: Option<PathBuf>,
}

/// Root under which per-application bases and the default config file live.
pub(crate) fn default_user_root() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows user base")?;
        return Ok(PathBuf::from(app_data).join("Freshpack"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve user base")?;
    Ok(PathBuf::from(home).join(".freshpack"))
}

pub(crate) fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let user_root = default_user_root().ok();
    let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    let source = select_config_file(
        overrides.config_path.as_deref(),
        env_path.as_deref(),
        user_root.as_deref(),
    );

    let file = match &source {
        Some(path) => load_config_file(path)?,
        None => UpdaterConfigFile::default(),
    };
    let flags = UpdaterConfigFile {
        manifest_url: overrides.manifest_url.clone(),
        app_name: overrides.app_name.clone(),
        base_dir: overrides.base_dir.clone(),
        ..UpdaterConfigFile::default()
    };

    let config = merge_config(file, flags, user_root.as_deref(), source.as_deref())?;
    Ok(ResolvedConfig { config, source })
}

/// An explicit `--config` or environment path is always used, so a typo
/// surfaces as a read error; the default location only counts when present.
pub(crate) fn select_config_file(
    flag_path: Option<&Path>,
    env_path: Option<&Path>,
    user_root: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = flag_path.or(env_path) {
        return Some(path.to_path_buf());
    }
    user_root
        .map(|root| root.join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

pub(crate) fn load_config_file(path: &Path) -> Result<UpdaterConfigFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading config file: {}", path.display()))?;
    UpdaterConfigFile::from_toml_str(&raw)
        .with_context(|| format!("failed parsing config file: {}", path.display()))
}

pub(crate) fn merge_config(
    file: UpdaterConfigFile,
    flags: UpdaterConfigFile,
    user_root: Option<&Path>,
    source: Option<&Path>,
) -> Result<UpdaterConfig> {
    let merged = file.overlay(flags);
    let hint = source
        .map(|path| format!("set it in {}", path.display()))
        .unwrap_or_else(|| "set it in a config file".to_string());

    let manifest_url = merged
        .manifest_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| anyhow!("no manifest URL configured; pass --manifest-url or {hint}"))?;
    let app_name = merged
        .app_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| anyhow!("no application configured; pass --app or {hint}"))?;

    let base_dir = match merged.base_dir {
        Some(base_dir) => base_dir,
        None => user_root
            .map(|root| root.join(&app_name))
            .ok_or_else(|| anyhow!("cannot derive a base directory; pass --base-dir"))?,
    };

    let mut config = UpdaterConfig::new(manifest_url, app_name, base_dir);
    if let Some(secs) = merged.manifest_timeout_secs {
        config.manifest_timeout = timeout_from_secs("manifest_timeout_secs", secs)?;
    }
    if let Some(secs) = merged.download_timeout_secs {
        config.download_timeout = timeout_from_secs("download_timeout_secs", secs)?;
    }
    Ok(config)
}

fn timeout_from_secs(key: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}
