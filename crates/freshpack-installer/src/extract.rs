use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use freshpack_core::{ArchiveType, UpdateError, UpdateResult};
use zip::ZipArchive;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Extracts every entry of `archive_path` under `dst`, preserving relative
/// paths. Entries that would land outside `dst` abort the extraction.
///
/// Returns the number of entries written.
pub fn extract_archive(
    archive_path: &Path,
    archive_type: ArchiveType,
    dst: &Path,
) -> UpdateResult<usize> {
    fs::create_dir_all(dst).map_err(UpdateError::io("create", dst))?;
    let count = match archive_type {
        ArchiveType::Zip => extract_zip(archive_path, dst)?,
        ArchiveType::TarGz => extract_tar_gz(archive_path, dst)?,
    };
    tracing::debug!(
        archive = %archive_path.display(),
        dst = %dst.display(),
        entries = count,
        "extracted archive"
    );
    Ok(count)
}

fn extract_zip(archive_path: &Path, dst: &Path) -> UpdateResult<usize> {
    let file = File::open(archive_path).map_err(UpdateError::io("open", archive_path))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|err| UpdateError::archive(archive_path, err.to_string()))?;
    let root = fs::canonicalize(dst).map_err(UpdateError::io("resolve", dst))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| UpdateError::archive(archive_path, format!("entry #{index}: {err}")))?;
        let escapes = || {
            UpdateError::archive(
                archive_path,
                format!("entry '{}' escapes the extraction directory", entry.name()),
            )
        };
        let Some(rel_path) = entry.enclosed_name() else {
            return Err(escapes());
        };
        if !has_only_normal_components(&rel_path) {
            return Err(escapes());
        }
        let out_path = dst.join(&rel_path);
        // Earlier entries may have planted symlinks along this path.
        if !resolves_inside(&root, &out_path).map_err(UpdateError::io("resolve", &out_path))? {
            return Err(escapes());
        }

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(UpdateError::io("create", &out_path))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(UpdateError::io("create", parent))?;
        }

        if entry.is_symlink() {
            let mut target = String::new();
            entry.read_to_string(&mut target).map_err(|err| {
                UpdateError::archive(archive_path, format!("entry '{}': {err}", entry.name()))
            })?;
            let target = PathBuf::from(target);
            let link_parent = out_path.parent().unwrap_or(dst);
            let resolved_target = link_parent.join(&target);
            let inside = target.is_relative()
                && resolves_inside(&root, &resolved_target)
                    .map_err(UpdateError::io("resolve", &resolved_target))?;
            if !inside {
                return Err(UpdateError::archive(
                    archive_path,
                    format!(
                        "symlink '{}' -> '{}' escapes the extraction directory",
                        rel_path.display(),
                        target.display()
                    ),
                ));
            }
            write_symlink(&target, &out_path)?;
            continue;
        }

        let mut out_file = File::create(&out_path).map_err(UpdateError::io("create", &out_path))?;
        copy_entry(&mut entry, &mut out_file, archive_path, &out_path)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;

            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(UpdateError::io("set permissions on", &out_path))?;
        }
    }

    Ok(archive.len())
}

fn extract_tar_gz(archive_path: &Path, dst: &Path) -> UpdateResult<usize> {
    let file = File::open(archive_path).map_err(UpdateError::io("open", archive_path))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = archive
        .entries()
        .map_err(|err| UpdateError::archive(archive_path, err.to_string()))?;

    let mut count = 0;
    for entry in entries {
        let mut entry = entry.map_err(|err| UpdateError::archive(archive_path, err.to_string()))?;
        let rel_path = entry
            .path()
            .map_err(|err| UpdateError::archive(archive_path, err.to_string()))?
            .into_owned();
        if !is_enclosed(&rel_path) {
            return Err(UpdateError::archive(
                archive_path,
                format!(
                    "entry '{}' escapes the extraction directory",
                    rel_path.display()
                ),
            ));
        }

        let unpacked = entry.unpack_in(dst).map_err(|err| {
            UpdateError::archive(
                archive_path,
                format!("entry '{}': {err}", rel_path.display()),
            )
        })?;
        if !unpacked {
            return Err(UpdateError::archive(
                archive_path,
                format!(
                    "entry '{}' escapes the extraction directory",
                    rel_path.display()
                ),
            ));
        }
        count += 1;
    }

    Ok(count)
}

/// Streams one entry, telling decode failures (archive) apart from write
/// failures (filesystem).
fn copy_entry(
    reader: &mut impl Read,
    writer: &mut File,
    archive_path: &Path,
    out_path: &Path,
) -> UpdateResult<()> {
    let mut buffer = vec![0_u8; COPY_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(UpdateError::archive(
                    archive_path,
                    format!("failed to decode {}: {err}", out_path.display()),
                ))
            }
        };
        writer
            .write_all(&buffer[..read])
            .map_err(UpdateError::io("write", out_path))?;
    }
    Ok(())
}

fn is_enclosed(rel_path: &Path) -> bool {
    let mut depth = 0_usize;
    for component in rel_path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

fn has_only_normal_components(rel_path: &Path) -> bool {
    rel_path
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Resolves the existing prefix of `path` on disk, symlinks included, then
/// applies the remaining components lexically. `root` must be canonical.
fn resolves_inside(root: &Path, path: &Path) -> io::Result<bool> {
    let components: Vec<Component<'_>> = path.components().collect();
    for split in (1..=components.len()).rev() {
        let existing: PathBuf = components[..split].iter().collect();
        match fs::canonicalize(&existing) {
            Ok(mut resolved) => {
                for component in &components[split..] {
                    match component {
                        Component::ParentDir => {
                            resolved.pop();
                        }
                        Component::Normal(part) => resolved.push(part),
                        _ => {}
                    }
                }
                return Ok(resolved.starts_with(root));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}

#[cfg(unix)]
fn write_symlink(target: &Path, link: &Path) -> UpdateResult<()> {
    std::os::unix::fs::symlink(target, link).map_err(UpdateError::io("create symlink", link))
}

#[cfg(not(unix))]
fn write_symlink(target: &Path, link: &Path) -> UpdateResult<()> {
    fs::write(link, target.to_string_lossy().as_bytes()).map_err(UpdateError::io("write", link))
}
