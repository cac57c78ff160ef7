mod extract;
mod fs_utils;
mod install;
mod layout;
mod lock;
mod receipts;
mod validate;

pub use extract::extract_archive;
pub use install::{ArchiveInstaller, PendingInstall};
pub use layout::{AppLayout, InstallPaths};
pub use lock::UpdateLock;
pub use receipts::{
    archive_sha256, current_unix_timestamp, read_install_receipt, write_install_receipt,
    InstallReceipt,
};
pub use validate::InstallValidator;
