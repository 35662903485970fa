//! Progress reporting for a running transfer.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cooperative cancellation shared between the caller and a running transfer.
pub type CancelToken = CancellationToken;

/// Callback receiving progress snapshots.
pub type ProgressFn<'a> = dyn Fn(&Progress) + Send + Sync + 'a;

/// Snapshot of a running transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files_done: u64,
    pub files_total: u64,
    /// Item currently being processed.
    pub current: Option<String>,
}
impl Progress {
    /// Completed fraction in `0.0..=1.0`, by bytes when any are known.
    pub fn fraction(&self) -> f64 {
        match (self.bytes_total, self.files_total) {
            (0, 0) => 1.0,
            (0, files) => self.files_done as f64 / files as f64,
            (bytes, _) => (self.bytes_done as f64 / bytes as f64).min(1.0),
        }
    }
}

/// Mutable state of one copy, move or delete invocation.
pub(crate) struct TransferTask<'a> {
    progress: Progress,
    interval: Duration,
    last_emit: Option<Instant>,
    on_progress: &'a ProgressFn<'a>,
    cancel: &'a CancelToken,
}

impl<'a> TransferTask<'a> {
    pub fn new(interval: Duration, on_progress: &'a ProgressFn<'a>, cancel: &'a CancelToken) -> Self {
        Self { progress: Progress::default(), interval, last_emit: None, on_progress, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn set_totals(&mut self, files_total: u64, bytes_total: u64) {
        self.progress.files_total = files_total;
        self.progress.bytes_total = bytes_total;
        self.emit(true);
    }

    pub fn start_item(&mut self, item: impl ToString) {
        self.progress.current = Some(item.to_string());
        self.emit(false);
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        self.progress.bytes_done += bytes;
        self.emit(false);
    }

    pub fn file_done(&mut self) {
        self.progress.files_done += 1;
        self.emit(false);
    }

    /// Final snapshot, always delivered.
    pub fn finish(&mut self) {
        self.progress.current = None;
        self.emit(true);
    }

    fn emit(&mut self, force: bool) {
        let now = Instant::now();
        let due = match self.last_emit {
            Some(last) => now.duration_since(last) >= self.interval,
            None => true,
        };
        if force || due {
            self.last_emit = Some(now);
            (self.on_progress)(&self.progress);
        }
    }
}
