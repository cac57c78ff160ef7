use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use freshpack_core::{UpdateError, UpdateResult};
use sha2::{Digest, Sha256};

use crate::layout::AppLayout;

/// Record of the last successful install of one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    pub name: String,
    pub version: Option<String>,
    pub archive_url: String,
    pub archive_path: PathBuf,
    pub archive_size: u64,
    pub archive_sha256: String,
    pub install_root: PathBuf,
    pub executable: PathBuf,
    pub installed_at_unix: u64,
}

pub fn write_install_receipt(layout: &AppLayout, receipt: &InstallReceipt) -> UpdateResult<PathBuf> {
    let mut payload = String::new();
    payload.push_str(&format!("name={}\n", receipt.name));
    if let Some(version) = &receipt.version {
        payload.push_str(&format!("version={}\n", version));
    }
    payload.push_str(&format!("archive_url={}\n", receipt.archive_url));
    payload.push_str(&format!(
        "archive_path={}\n",
        receipt.archive_path.display()
    ));
    payload.push_str(&format!("archive_size={}\n", receipt.archive_size));
    payload.push_str(&format!("archive_sha256={}\n", receipt.archive_sha256));
    payload.push_str(&format!(
        "install_root={}\n",
        receipt.install_root.display()
    ));
    payload.push_str(&format!("executable={}\n", receipt.executable.display()));
    payload.push_str(&format!(
        "installed_at_unix={}\n",
        receipt.installed_at_unix
    ));

    let state_dir = layout.state_dir();
    fs::create_dir_all(&state_dir).map_err(UpdateError::io("create", &state_dir))?;
    let path = layout.receipt_path(&receipt.name);
    fs::write(&path, payload.as_bytes()).map_err(UpdateError::io("write", &path))?;
    Ok(path)
}

pub fn read_install_receipt(layout: &AppLayout, app: &str) -> UpdateResult<Option<InstallReceipt>> {
    let path = layout.receipt_path(app);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(UpdateError::io("read", &path)(err)),
    };

    parse_receipt(&raw)
        .map(Some)
        .map_err(|reason| UpdateError::Parse {
            origin: path.display().to_string(),
            reason,
        })
}

pub(crate) fn parse_receipt(raw: &str) -> Result<InstallReceipt, String> {
    let mut name = None;
    let mut version = None;
    let mut archive_url = None;
    let mut archive_path = None;
    let mut archive_size = None;
    let mut archive_sha256 = None;
    let mut install_root = None;
    let mut executable = None;
    let mut installed_at_unix = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k {
            "name" => name = Some(v.to_string()),
            "version" => version = Some(v.to_string()),
            "archive_url" => archive_url = Some(v.to_string()),
            "archive_path" => archive_path = Some(PathBuf::from(v)),
            "archive_size" => {
                archive_size = Some(
                    v.parse()
                        .map_err(|_| format!("archive_size must be u64, got '{v}'"))?,
                )
            }
            "archive_sha256" => archive_sha256 = Some(v.to_string()),
            "install_root" => install_root = Some(PathBuf::from(v)),
            "executable" => executable = Some(PathBuf::from(v)),
            "installed_at_unix" => {
                installed_at_unix = Some(
                    v.parse()
                        .map_err(|_| format!("installed_at_unix must be u64, got '{v}'"))?,
                )
            }
            _ => {}
        }
    }

    let missing = |field: &str| format!("missing {field}");
    Ok(InstallReceipt {
        name: name.ok_or_else(|| missing("name"))?,
        version,
        archive_url: archive_url.ok_or_else(|| missing("archive_url"))?,
        archive_path: archive_path.ok_or_else(|| missing("archive_path"))?,
        archive_size: archive_size.ok_or_else(|| missing("archive_size"))?,
        archive_sha256: archive_sha256.ok_or_else(|| missing("archive_sha256"))?,
        install_root: install_root.ok_or_else(|| missing("install_root"))?,
        executable: executable.ok_or_else(|| missing("executable"))?,
        installed_at_unix: installed_at_unix.ok_or_else(|| missing("installed_at_unix"))?,
    })
}

/// Hex SHA-256 of the archive, recorded as a fingerprint only.
pub fn archive_sha256(path: &Path) -> UpdateResult<String> {
    let mut file = File::open(path).map_err(UpdateError::io("open", path))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(UpdateError::io("read", path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
