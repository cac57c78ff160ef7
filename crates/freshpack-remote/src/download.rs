use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use freshpack_core::{UpdateError, UpdateResult};
use reqwest::blocking::{Client, Response};

use crate::cancel::CancellationToken;
use crate::client::{build_client, describe_request_error};
use crate::progress::{ProgressSink, ThroughputMeter};

pub const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    pub total: Option<u64>,
    pub elapsed: Duration,
}

/// Streams archives to disk and enforces the declared size.
#[derive(Debug, Clone)]
pub struct ArchiveDownloader {
    client: Client,
    timeout: Duration,
}

impl ArchiveDownloader {
    pub fn new(timeout: Duration) -> UpdateResult<Self> {
        let client = build_client(timeout).map_err(|err| UpdateError::Download {
            url: String::new(),
            reason: format!("failed to build HTTP client: {err}"),
        })?;
        Ok(Self { client, timeout })
    }

    /// Downloads `url` to `dest`.
    ///
    /// Bytes land in `<dest>.part` first and are renamed onto `dest` only
    /// once the stream ended cleanly and the size matched, so `dest` never
    /// holds a truncated payload from this call.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_size: Option<u64>,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> UpdateResult<DownloadOutcome> {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(UpdateError::io("create", parent))?;
        }

        tracing::info!(url, dest = %dest.display(), "downloading archive");
        let response = self.client.get(url).send().map_err(|err| UpdateError::Download {
            url: url.to_string(),
            reason: describe_request_error(&err, self.timeout),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Download {
                url: url.to_string(),
                reason: format!("server returned {status}"),
            });
        }

        let total = response.content_length().or(expected_size);
        let part_path = part_path_for(dest);
        let mut meter = ThroughputMeter::start();

        let streamed = stream_to_file(
            response,
            url,
            &part_path,
            total,
            &mut meter,
            progress,
            cancel,
        );
        let bytes = match streamed {
            Ok(bytes) => bytes,
            Err(err) => {
                discard_partial(&part_path);
                return Err(err);
            }
        };

        let actual = match fs::metadata(&part_path) {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                discard_partial(&part_path);
                return Err(UpdateError::io("stat", &part_path)(err));
            }
        };
        if let Some(expected) = expected_size {
            if actual != expected {
                discard_partial(&part_path);
                return Err(UpdateError::Integrity {
                    path: dest.to_path_buf(),
                    expected,
                    actual,
                });
            }
        }

        if let Err(err) = fs::rename(&part_path, dest) {
            discard_partial(&part_path);
            return Err(UpdateError::io("move downloaded archive into", dest)(err));
        }

        let elapsed = meter.sample(bytes, total).elapsed;
        tracing::info!(
            dest = %dest.display(),
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "download complete"
        );
        Ok(DownloadOutcome {
            path: dest.to_path_buf(),
            bytes,
            total,
            elapsed,
        })
    }
}

fn stream_to_file(
    mut response: Response,
    url: &str,
    part_path: &Path,
    total: Option<u64>,
    meter: &mut ThroughputMeter,
    progress: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> UpdateResult<u64> {
    let file = File::create(part_path).map_err(UpdateError::io("create", part_path))?;
    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0_u8; DOWNLOAD_CHUNK_SIZE];
    let mut downloaded = 0_u64;

    progress.on_progress(&meter.sample(downloaded, total));
    loop {
        if cancel.is_cancelled() {
            tracing::warn!(url, downloaded, "download cancelled");
            return Err(UpdateError::Cancelled);
        }

        let read = match response.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(UpdateError::Download {
                    url: url.to_string(),
                    reason: format!("stream interrupted after {downloaded} bytes: {err}"),
                })
            }
        };

        writer
            .write_all(&buffer[..read])
            .map_err(UpdateError::io("write", part_path))?;
        downloaded += read as u64;
        progress.on_progress(&meter.sample(downloaded, total));
    }

    let file = writer
        .into_inner()
        .map_err(|err| UpdateError::io("flush", part_path)(err.into_error()))?;
    file.sync_all().map_err(UpdateError::io("sync", part_path))?;
    Ok(downloaded)
}

fn part_path_for(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "archive".into());
    name.push(".part");
    dest.with_file_name(name)
}

fn discard_partial(part_path: &Path) {
    if let Err(err) = fs::remove_file(part_path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %part_path.display(), error = %err, "failed to remove partial download");
        }
    }
}
