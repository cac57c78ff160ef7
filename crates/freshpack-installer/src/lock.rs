use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use freshpack_core::{UpdateError, UpdateResult};

use crate::layout::AppLayout;

/// Exclusive per-application marker held for the duration of an update.
///
/// Released when dropped.
#[derive(Debug)]
pub struct UpdateLock {
    path: PathBuf,
}

impl UpdateLock {
    pub fn acquire(layout: &AppLayout, app: &str) -> UpdateResult<Self> {
        let state_dir = layout.state_dir();
        fs::create_dir_all(&state_dir).map_err(UpdateError::io("create", &state_dir))?;

        let path = layout.lock_path(app);
        match create_lock_file(&path) {
            Ok(lock) => Ok(lock),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if !lock_is_stale(&path) {
                    return Err(UpdateError::Locked {
                        app: app.to_string(),
                        path,
                    });
                }
                tracing::warn!(lock = %path.display(), "removing stale update lock");
                fs::remove_file(&path).map_err(UpdateError::io("remove", &path))?;
                create_lock_file(&path).map_err(|err| {
                    if err.kind() == io::ErrorKind::AlreadyExists {
                        UpdateError::Locked {
                            app: app.to_string(),
                            path: path.clone(),
                        }
                    } else {
                        UpdateError::io("create", &path)(err)
                    }
                })
            }
            Err(err) => Err(UpdateError::io("create", &path)(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %err, "failed to release update lock");
        }
    }
}

fn create_lock_file(path: &Path) -> io::Result<UpdateLock> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let lock = UpdateLock {
        path: path.to_path_buf(),
    };
    writeln!(file, "pid={}", std::process::id())?;
    Ok(lock)
}

/// A lock is stale when its recorded owner is known to be gone. Liveness is
/// only checked where `/proc` exists; elsewhere a lock is never considered
/// stale.
fn lock_is_stale(path: &Path) -> bool {
    let Ok(raw) = fs::read_to_string(path) else {
        return false;
    };
    let Some(pid) = raw
        .lines()
        .find_map(|line| line.trim().strip_prefix("pid="))
        .and_then(|value| value.parse::<u32>().ok())
    else {
        return false;
    };
    pid != std::process::id() && process_is_gone(pid)
}

#[cfg(target_os = "linux")]
fn process_is_gone(pid: u32) -> bool {
    !Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_is_gone(_pid: u32) -> bool {
    false
}
