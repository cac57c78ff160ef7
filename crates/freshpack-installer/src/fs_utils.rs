use std::fs;
use std::io;
use std::path::Path;

use freshpack_core::{EntryKind, TopLevelEntry, UpdateError, UpdateResult};

pub(crate) fn path_exists(path: &Path) -> UpdateResult<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(UpdateError::io("stat", path)(err)),
    }
}

/// Removes `path` recursively. Returns whether anything was there.
pub(crate) fn remove_dir_if_exists(path: &Path) -> UpdateResult<bool> {
    if !path_exists(path)? {
        return Ok(false);
    }
    fs::remove_dir_all(path).map_err(UpdateError::io("remove", path))?;
    Ok(true)
}

pub(crate) fn list_top_level(dir: &Path) -> UpdateResult<Vec<TopLevelEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(UpdateError::io("read", dir))? {
        let entry = entry.map_err(UpdateError::io("read", dir))?;
        let file_type = entry
            .file_type()
            .map_err(UpdateError::io("stat", &entry.path()))?;
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push(TopLevelEntry::new(entry.file_name(), kind));
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub(crate) fn move_dir_or_copy(src: &Path, dst: &Path) -> UpdateResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(UpdateError::io("create", parent))?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                error = %err,
                "rename failed, falling back to copy"
            );
            copy_dir_recursive(src, dst)?;
            fs::remove_dir_all(src).map_err(UpdateError::io("remove", src))?;
            Ok(())
        }
    }
}

pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> UpdateResult<()> {
    fs::create_dir_all(dst).map_err(UpdateError::io("create", dst))?;
    for entry in fs::read_dir(src).map_err(UpdateError::io("read", src))? {
        let entry = entry.map_err(UpdateError::io("read", src))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let metadata =
            fs::symlink_metadata(&src_path).map_err(UpdateError::io("stat", &src_path))?;
        if metadata.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
            continue;
        }

        #[cfg(unix)]
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&src_path).map_err(UpdateError::io("read link", &src_path))?;
            std::os::unix::fs::symlink(&target, &dst_path)
                .map_err(UpdateError::io("create symlink", &dst_path))?;
            continue;
        }

        fs::copy(&src_path, &dst_path).map_err(UpdateError::io("copy into", &dst_path))?;
    }
    Ok(())
}
