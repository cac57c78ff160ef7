use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::archive::ArchiveType;
use crate::error::{UpdateError, UpdateResult};

/// Release metadata for one application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppDescriptor {
    pub download_url: String,
    pub zip_name: String,
    #[serde(default)]
    pub size: Option<u64>,
    pub after_extract_name: String,
    pub after_extract_exe_path: String,
    /// Compared as semver only when it parses as one.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub archive: Option<String>,
}

impl AppDescriptor {
    /// Declared archive size, `None` when absent or zero.
    pub fn expected_size(&self) -> Option<u64> {
        self.size.filter(|size| *size > 0)
    }

    /// Executable path relative to the install root.
    pub fn executable_rel_path(&self) -> PathBuf {
        split_relative(&self.after_extract_exe_path)
            .into_iter()
            .collect()
    }

    pub fn archive_type(&self) -> UpdateResult<ArchiveType> {
        if let Some(archive) = &self.archive {
            return ArchiveType::parse(archive).ok_or_else(|| UpdateError::Parse {
                origin: self.download_url.clone(),
                reason: format!("unsupported archive type '{archive}'; supported: zip, tar.gz"),
            });
        }

        Ok(ArchiveType::infer_from_file_name(&self.zip_name).unwrap_or(ArchiveType::Zip))
    }

    fn validate_and_normalize(mut self, app: &str, origin: &str) -> UpdateResult<Self> {
        let invalid = |reason: String| UpdateError::Parse {
            origin: origin.to_string(),
            reason: format!("entry '{app}': {reason}"),
        };

        if self.download_url.trim().is_empty() {
            return Err(invalid("download_url must not be empty".to_string()));
        }
        validate_single_component("zip_name", &self.zip_name).map_err(invalid)?;
        validate_single_component("after_extract_name", &self.after_extract_name)
            .map_err(invalid)?;
        self.after_extract_exe_path =
            normalize_exe_path(&self.after_extract_exe_path).map_err(invalid)?;
        if let Some(archive) = &self.archive {
            if ArchiveType::parse(archive).is_none() {
                return Err(invalid(format!(
                    "unsupported archive type '{archive}'; supported: zip, tar.gz"
                )));
            }
        }

        Ok(self)
    }
}

/// Remote document listing applications and their current release.
///
/// Entries stay as raw JSON until requested, so one malformed entry does not
/// prevent updating another application.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    origin: String,
    entries: BTreeMap<String, Value>,
}

impl Manifest {
    pub fn from_json_str(origin: &str, input: &str) -> UpdateResult<Self> {
        let parse_error = |reason: String| UpdateError::Parse {
            origin: origin.to_string(),
            reason,
        };

        let value: Value =
            serde_json::from_str(input).map_err(|err| parse_error(err.to_string()))?;
        let Value::Object(map) = value else {
            return Err(parse_error(
                "top-level document must be an object keyed by application name".to_string(),
            ));
        };

        Ok(Self {
            origin: origin.to_string(),
            entries: map.into_iter().collect(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn app_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains(&self, app: &str) -> bool {
        self.entries.contains_key(app)
    }

    pub fn descriptor(&self, app: &str) -> UpdateResult<AppDescriptor> {
        let raw = self.entries.get(app).ok_or_else(|| UpdateError::NotFound {
            app: app.to_string(),
            origin: self.origin.clone(),
        })?;

        let descriptor: AppDescriptor =
            serde_json::from_value(raw.clone()).map_err(|err| UpdateError::Parse {
                origin: self.origin.clone(),
                reason: format!("entry '{app}': {err}"),
            })?;
        descriptor.validate_and_normalize(app, &self.origin)
    }
}

fn validate_single_component(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(format!(
            "{field} must be a single path component: '{value}'"
        ));
    }
    Ok(())
}

fn split_relative(raw: &str) -> Vec<&str> {
    raw.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect()
}

fn normalize_exe_path(raw: &str) -> Result<String, String> {
    if raw.starts_with('/') || raw.starts_with('\\') || raw.get(1..2) == Some(":") {
        return Err(format!(
            "after_extract_exe_path must be relative: '{raw}'"
        ));
    }

    let parts = split_relative(raw);
    if parts.is_empty() {
        return Err("after_extract_exe_path must name a file".to_string());
    }
    if parts.contains(&"..") {
        return Err(format!(
            "after_extract_exe_path must stay inside the install root: '{raw}'"
        ));
    }

    Ok(parts.join("/"))
}
