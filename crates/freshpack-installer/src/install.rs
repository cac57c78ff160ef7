use std::fs;
use std::path::{Path, PathBuf};

use freshpack_core::{select_source_root, ArchiveType, SourceRoot, UpdateError, UpdateResult};

use crate::extract::extract_archive;
use crate::fs_utils::{list_top_level, move_dir_or_copy, path_exists, remove_dir_if_exists};
use crate::layout::InstallPaths;

/// Extracts archives into a clean staging directory and swaps the result
/// into the install root.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveInstaller;

/// A freshly swapped install whose predecessor is still held aside.
///
/// Call [`PendingInstall::commit`] once the install is known good, or
/// [`PendingInstall::rollback`] to put the previous install back.
#[derive(Debug)]
#[must_use = "a pending install must be committed or rolled back"]
pub struct PendingInstall {
    install_root: PathBuf,
    backup_dir: Option<PathBuf>,
    entries: usize,
    flattened: bool,
}

impl ArchiveInstaller {
    pub fn new() -> Self {
        Self
    }

    pub fn install(
        &self,
        archive_path: &Path,
        archive_type: ArchiveType,
        paths: &InstallPaths,
    ) -> UpdateResult<PendingInstall> {
        recover_interrupted_swap(paths)?;

        if remove_dir_if_exists(&paths.staging_dir)? {
            tracing::info!(
                staging = %paths.staging_dir.display(),
                "removed stale staging directory"
            );
        }
        fs::create_dir_all(&paths.staging_dir)
            .map_err(UpdateError::io("create", &paths.staging_dir))?;

        let extracted = extract_archive(archive_path, archive_type, &paths.staging_dir)
            .and_then(|entries| Ok((entries, list_top_level(&paths.staging_dir)?)));
        let (entries, top_level) = match extracted {
            Ok(extracted) => extracted,
            Err(err) => {
                discard_staging(&paths.staging_dir);
                return Err(err);
            }
        };

        let source_root = match select_source_root(&top_level) {
            SourceRoot::Staging => paths.staging_dir.clone(),
            SourceRoot::Wrapped(name) => paths.staging_dir.join(name),
        };
        let flattened = source_root != paths.staging_dir;
        if flattened {
            tracing::debug!(root = %source_root.display(), "flattening single wrapping directory");
        }

        let backup_dir = swap_into_place(&source_root, paths)?;
        let pending = PendingInstall {
            install_root: paths.install_root.clone(),
            backup_dir,
            entries,
            flattened,
        };

        if let Err(err) = remove_dir_if_exists(&paths.staging_dir) {
            if let Err(rollback_err) = pending.rollback() {
                tracing::warn!(error = %rollback_err, "failed to roll back install");
            }
            return Err(err);
        }

        tracing::info!(
            install_root = %paths.install_root.display(),
            entries,
            flattened,
            "installed archive"
        );
        Ok(pending)
    }
}

impl PendingInstall {
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn replaced_previous(&self) -> bool {
        self.backup_dir.is_some()
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn flattened(&self) -> bool {
        self.flattened
    }

    /// Drops the previous install.
    pub fn commit(self) -> UpdateResult<()> {
        if let Some(backup_dir) = &self.backup_dir {
            remove_dir_if_exists(backup_dir)?;
        }
        Ok(())
    }

    /// Removes the new install and restores the previous one, if any.
    pub fn rollback(self) -> UpdateResult<()> {
        remove_dir_if_exists(&self.install_root)?;
        if let Some(backup_dir) = &self.backup_dir {
            fs::rename(backup_dir, &self.install_root)
                .map_err(UpdateError::io("restore previous install to", &self.install_root))?;
            tracing::info!(
                install_root = %self.install_root.display(),
                "restored previous install"
            );
        }
        Ok(())
    }
}

/// Moves the current install aside, then moves `source_root` into its
/// place. Returns the backup location when a previous install existed.
fn swap_into_place(source_root: &Path, paths: &InstallPaths) -> UpdateResult<Option<PathBuf>> {
    let backup_dir = if path_exists(&paths.install_root)? {
        fs::rename(&paths.install_root, &paths.backup_dir)
            .map_err(UpdateError::io("move previous install to", &paths.backup_dir))?;
        Some(paths.backup_dir.clone())
    } else {
        None
    };

    if let Err(err) = move_dir_or_copy(source_root, &paths.install_root) {
        if let Err(remove_err) = remove_dir_if_exists(&paths.install_root) {
            tracing::warn!(
                install_root = %paths.install_root.display(),
                error = %remove_err,
                "failed to remove partial install"
            );
        }
        if let Some(backup_dir) = &backup_dir {
            if let Err(restore_err) = fs::rename(backup_dir, &paths.install_root) {
                tracing::warn!(
                    backup = %backup_dir.display(),
                    error = %restore_err,
                    "failed to restore previous install"
                );
            }
        }
        discard_staging(&paths.staging_dir);
        return Err(err);
    }

    Ok(backup_dir)
}

/// Repairs the state a crash between the two renames of a swap leaves.
fn recover_interrupted_swap(paths: &InstallPaths) -> UpdateResult<()> {
    if !path_exists(&paths.backup_dir)? {
        return Ok(());
    }

    if path_exists(&paths.install_root)? {
        remove_dir_if_exists(&paths.backup_dir)?;
        tracing::info!(backup = %paths.backup_dir.display(), "removed stale install backup");
    } else {
        fs::rename(&paths.backup_dir, &paths.install_root)
            .map_err(UpdateError::io("restore previous install to", &paths.install_root))?;
        tracing::warn!(
            install_root = %paths.install_root.display(),
            "restored install left aside by an interrupted update"
        );
    }
    Ok(())
}

fn discard_staging(staging_dir: &Path) {
    if let Err(err) = remove_dir_if_exists(staging_dir) {
        tracing::warn!(staging = %staging_dir.display(), error = %err, "failed to remove staging directory");
    }
}
