mod archive;
mod config;
mod error;
mod layout;
mod manifest;

pub use archive::ArchiveType;
pub use config::{
    UpdaterConfig, UpdaterConfigFile, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_MANIFEST_TIMEOUT,
};
pub use error::{ErrorKind, UpdateError, UpdateResult};
pub use layout::{select_source_root, EntryKind, SourceRoot, TopLevelEntry};
pub use manifest::{AppDescriptor, Manifest};
