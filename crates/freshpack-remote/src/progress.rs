use std::time::{Duration, Instant};

/// Minimum spacing between throughput samples.
const RATE_WINDOW: Duration = Duration::from_millis(250);

/// One observation of a running download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// From `Content-Length`, else the manifest size, else unknown.
    pub total: Option<u64>,
    pub elapsed: Duration,
    pub bytes_per_sec: f64,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<u8> {
        let total = self.total.filter(|total| *total > 0)?;
        let percent = (self.downloaded.min(total) * 100) / total;
        Some(percent as u8)
    }
}

/// Receives progress observations. Purely observational.
pub trait ProgressSink {
    fn on_progress(&mut self, progress: &DownloadProgress);
}

impl<F> ProgressSink for F
where
    F: FnMut(&DownloadProgress),
{
    fn on_progress(&mut self, progress: &DownloadProgress) {
        self(progress)
    }
}

#[derive(Debug)]
pub(crate) struct ThroughputMeter {
    started_at: Instant,
    window_start: Instant,
    window_bytes: u64,
    bytes_per_sec: f64,
}

impl ThroughputMeter {
    pub(crate) fn start() -> Self {
        let now = Instant::now();
        Self {
            started_at: now,
            window_start: now,
            window_bytes: 0,
            bytes_per_sec: 0.0,
        }
    }

    pub(crate) fn sample(&mut self, downloaded: u64, total: Option<u64>) -> DownloadProgress {
        let now = Instant::now();
        let window = now.duration_since(self.window_start);
        if window >= RATE_WINDOW {
            let delta = downloaded.saturating_sub(self.window_bytes);
            self.bytes_per_sec = delta as f64 / window.as_secs_f64();
            self.window_start = now;
            self.window_bytes = downloaded;
        }

        DownloadProgress {
            downloaded,
            total,
            elapsed: now.duration_since(self.started_at),
            bytes_per_sec: self.bytes_per_sec,
        }
    }
}
