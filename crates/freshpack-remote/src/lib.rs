mod cancel;
mod client;
mod download;
mod manifest;
mod progress;

pub use cancel::CancellationToken;
pub use download::{ArchiveDownloader, DownloadOutcome, DOWNLOAD_CHUNK_SIZE};
pub use manifest::ManifestFetcher;
pub use progress::{DownloadProgress, ProgressSink};
