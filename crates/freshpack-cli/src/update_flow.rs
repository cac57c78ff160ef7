use std::fmt;
use std::path::{Path, PathBuf};

use freshpack_core::{AppDescriptor, UpdateError, UpdaterConfig};
use freshpack_installer::{
    archive_sha256, current_unix_timestamp, read_install_receipt, write_install_receipt,
    AppLayout, ArchiveInstaller, InstallPaths, InstallReceipt, InstallValidator, UpdateLock,
};
use freshpack_remote::{ArchiveDownloader, CancellationToken, ManifestFetcher, ProgressSink};
use semver::Version;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum UpdateStage {
    Prepare,
    Manifest,
    Download,
    Install,
    Validate,
}

impl UpdateStage {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Manifest => "manifest",
            Self::Download => "download",
            Self::Install => "install",
            Self::Validate => "validate",
        }
    }

    fn fail(self) -> impl FnOnce(UpdateError) -> StageFailure {
        move |source| StageFailure {
            stage: self,
            source,
        }
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An update run that stopped at `stage`.
#[derive(Debug, Error)]
#[error("{stage} stage failed ({}): {source}", .source.kind().as_str())]
pub(crate) struct StageFailure {
    pub(crate) stage: UpdateStage,
    #[source]
    pub(crate) source: UpdateError,
}

impl StageFailure {
    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(self.source, UpdateError::Cancelled)
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct UpdateOptions {
    pub(crate) skip_if_current: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum UpdateStatus {
    Installed,
    UpToDate,
}

#[derive(Debug, Clone)]
pub(crate) struct UpdateOutcome {
    pub(crate) status: UpdateStatus,
    pub(crate) app_name: String,
    pub(crate) install_root: PathBuf,
    pub(crate) executable: PathBuf,
    pub(crate) version: Option<String>,
    pub(crate) archive_path: Option<PathBuf>,
    pub(crate) receipt_path: Option<PathBuf>,
    pub(crate) downloaded_bytes: u64,
    pub(crate) flattened: bool,
    pub(crate) replaced_previous: bool,
}

/// Runs manifest lookup, download, install and validation for one
/// application, in that order, once.
#[derive(Debug, Clone)]
pub(crate) struct UpdateOrchestrator {
    config: UpdaterConfig,
    layout: AppLayout,
}

impl UpdateOrchestrator {
    pub(crate) fn new(config: UpdaterConfig) -> Self {
        let layout = AppLayout::new(config.base_dir.clone());
        Self { config, layout }
    }

    pub(crate) fn layout(&self) -> &AppLayout {
        &self.layout
    }

    pub(crate) fn run(
        &self,
        options: UpdateOptions,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome, StageFailure> {
        let app = self.config.app_name.as_str();

        self.layout
            .ensure_base_dirs()
            .map_err(UpdateStage::Prepare.fail())?;
        let _lock = UpdateLock::acquire(&self.layout, app).map_err(UpdateStage::Prepare.fail())?;

        let fetcher = ManifestFetcher::new(&self.config.manifest_url, self.config.manifest_timeout)
            .map_err(UpdateStage::Manifest.fail())?;
        let descriptor = fetcher
            .fetch_descriptor(app)
            .map_err(UpdateStage::Manifest.fail())?;
        let archive_type = descriptor
            .archive_type()
            .map_err(UpdateStage::Manifest.fail())?;
        let paths = self.layout.install_paths(&descriptor.after_extract_name);

        if options.skip_if_current {
            if let Some(outcome) = self.current_install(&descriptor, &paths) {
                tracing::info!(app, "install is already current, skipping download");
                return Ok(outcome);
            }
        }

        let archive_path = self.layout.archive_path(&descriptor.zip_name);
        let downloader = ArchiveDownloader::new(self.config.download_timeout)
            .map_err(UpdateStage::Download.fail())?;
        let downloaded = downloader
            .download(
                &descriptor.download_url,
                &archive_path,
                descriptor.expected_size(),
                progress,
                cancel,
            )
            .map_err(UpdateStage::Download.fail())?;

        // Last point at which the existing install is untouched.
        if cancel.is_cancelled() {
            return Err(UpdateStage::Install.fail()(UpdateError::Cancelled));
        }

        let pending = ArchiveInstaller::new()
            .install(&archive_path, archive_type, &paths)
            .map_err(UpdateStage::Install.fail())?;
        let flattened = pending.flattened();
        let replaced_previous = pending.replaced_previous();

        let validated =
            InstallValidator::new().validate(pending.install_root(), &descriptor.executable_rel_path());
        let executable = match validated {
            Ok(executable) => executable,
            Err(err) => {
                if let Err(rollback_err) = pending.rollback() {
                    tracing::warn!(
                        install_root = %paths.install_root.display(),
                        error = %rollback_err,
                        "failed to restore previous install"
                    );
                }
                return Err(UpdateStage::Validate.fail()(err));
            }
        };

        if let Err(err) = pending.commit() {
            tracing::warn!(
                backup = %paths.backup_dir.display(),
                error = %err,
                "failed to remove previous install; it will be cleaned up on the next update"
            );
        }

        let receipt_path = self.record_receipt(
            &descriptor,
            &archive_path,
            downloaded.bytes,
            &paths.install_root,
            &executable,
        );

        Ok(UpdateOutcome {
            status: UpdateStatus::Installed,
            app_name: app.to_string(),
            install_root: paths.install_root.clone(),
            executable,
            version: descriptor.version.clone(),
            archive_path: Some(archive_path),
            receipt_path,
            downloaded_bytes: downloaded.bytes,
            flattened,
            replaced_previous,
        })
    }

    /// The existing install, when the receipt shows it at or beyond the
    /// manifest version and its executable is still present.
    fn current_install(
        &self,
        descriptor: &AppDescriptor,
        paths: &InstallPaths,
    ) -> Option<UpdateOutcome> {
        let raw_offered = descriptor.version.as_deref()?;
        let offered = match Version::parse(raw_offered) {
            Ok(version) => version,
            Err(err) => {
                tracing::debug!(
                    version = raw_offered,
                    error = %err,
                    "manifest version is not comparable, downloading"
                );
                return None;
            }
        };
        let receipt = match read_install_receipt(&self.layout, &self.config.app_name) {
            Ok(receipt) => receipt?,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable install receipt");
                return None;
            }
        };
        let installed = receipt
            .version
            .as_deref()
            .and_then(|raw| Version::parse(raw).ok())?;

        if installed < offered
            || receipt.install_root != paths.install_root
            || !receipt.executable.is_file()
        {
            return None;
        }

        Some(UpdateOutcome {
            status: UpdateStatus::UpToDate,
            app_name: self.config.app_name.clone(),
            install_root: receipt.install_root,
            executable: receipt.executable,
            version: receipt.version,
            archive_path: None,
            receipt_path: Some(self.layout.receipt_path(&self.config.app_name)),
            downloaded_bytes: 0,
            flattened: false,
            replaced_previous: false,
        })
    }

    /// Receipts are informational; failing to write one does not fail the
    /// update.
    fn record_receipt(
        &self,
        descriptor: &AppDescriptor,
        archive_path: &Path,
        archive_size: u64,
        install_root: &Path,
        executable: &Path,
    ) -> Option<PathBuf> {
        let result = archive_sha256(archive_path).and_then(|archive_sha256| {
            let receipt = InstallReceipt {
                name: self.config.app_name.clone(),
                version: descriptor.version.clone(),
                archive_url: descriptor.download_url.clone(),
                archive_path: archive_path.to_path_buf(),
                archive_size,
                archive_sha256,
                install_root: install_root.to_path_buf(),
                executable: executable.to_path_buf(),
                installed_at_unix: current_unix_timestamp(),
            };
            write_install_receipt(&self.layout, &receipt)
        });

        match result {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(error = %err, "failed to write install receipt");
                None
            }
        }
    }
}
