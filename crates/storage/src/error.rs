//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Every variant renders to a single
//! line, so the navigation layer can show it in a status bar as-is.

use derive_more::{Display, Error};
use std::fmt;
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// Locators are carried as their canonical string form.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Path does not exist
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Destination already exists and overwriting was not requested
    #[display("already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// Remote service could not be reached, or is not configured
    #[display("backend unavailable: {_0}")]
    BackendUnavailable(#[error(not(source))] String),
    /// Attempt to mutate an archive
    #[display("read-only storage: {_0}")]
    ReadOnly(#[error(not(source))] String),
    #[display("not a directory: {_0}")]
    NotADirectory(#[error(not(source))] String),
    #[display("is a directory: {_0}")]
    IsADirectory(#[error(not(source))] String),
    #[display("directory not empty: {_0}")]
    DirectoryNotEmpty(#[error(not(source))] String),
    /// Locator could not be interpreted by the backend it dispatched to
    #[display("invalid locator: {_0}")]
    InvalidLocator(#[error(not(source))] String),
    /// Operation is not available on this backend (or pair of backends)
    #[display("unsupported operation: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Archive container could not be parsed or a member could not be read
    #[display("archive error: {_0}")]
    Archive(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
    /// Some items of a batch or recursive operation failed
    #[display("{_0}")]
    PartialFailure(#[error(not(source))] BatchReport),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BackendUnavailable(_) | Self::BackendError(_))
    }

    /// Map an I/O error onto the taxonomy, attributing it to `locator`.
    pub fn from_io(err: IoError, locator: impl fmt::Display) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(locator.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(locator.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(locator.to_string()),
            std::io::ErrorKind::NotADirectory => Self::NotADirectory(locator.to_string()),
            std::io::ErrorKind::IsADirectory => Self::IsADirectory(locator.to_string()),
            std::io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty(locator.to_string()),
            std::io::ErrorKind::CrossesDevices => Self::Unsupported(format!("{locator}: {err}")),
            _ => Self::Io(err),
        }
    }
}

/// A single failed item of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub item: String,
    pub cause: String,
}

/// Outcome of a batch or recursive operation.
///
/// Lets the caller report "N of M succeeded" plus the first few reasons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<Failure>,
}
impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Render a one-line summary including the first `reasons` failures.
    pub fn summary_line(&self, reasons: usize) -> String {
        let mut line = format!("{} of {} succeeded", self.succeeded.len(), self.total());
        for failure in self.failed.iter().take(reasons) {
            line.push_str(&format!("; {}: {}", failure.item, failure.cause));
        }
        if self.failed.len() > reasons {
            line.push_str(&format!("; and {} more", self.failed.len() - reasons));
        }
        line
    }
}
impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partial failure: {}", self.summary_line(3))
    }
}

/// Accumulates per-item outcomes without aborting on the first failure.
///
/// The collected errors become children of the final `PartialFailure` frame,
/// so nothing about an individual failure is lost from the error tree.
pub struct Batch<E: std::error::Error + Send + Sync + 'static = ErrorKind> {
    report: BatchReport,
    errors: Vec<exn::Exn<E>>,
}
impl<E: std::error::Error + Send + Sync + 'static> Default for Batch<E> {
    fn default() -> Self {
        Self { report: BatchReport::default(), errors: Vec::new() }
    }
}
impl<E: std::error::Error + Send + Sync + 'static> Batch<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(&mut self, item: impl fmt::Display) {
        self.report.succeeded.push(item.to_string());
    }

    pub fn failed(&mut self, item: impl fmt::Display, err: exn::Exn<E>) {
        self.report.failed.push(Failure { item: item.to_string(), cause: (*err).to_string() });
        self.errors.push(err);
    }

    /// Fold another batch's outcome into this one.
    pub fn absorb(&mut self, other: Batch<E>) {
        self.report.succeeded.extend(other.report.succeeded);
        self.report.failed.extend(other.report.failed);
        self.errors.extend(other.errors);
    }

    /// Fold in a nested batch operation that already finished with `err`.
    /// Its items are merged into this report and its error tree is kept as a
    /// single child.
    pub fn absorb_partial(&mut self, report: &BatchReport, err: exn::Exn<E>) {
        self.report.succeeded.extend(report.succeeded.iter().cloned());
        self.report.failed.extend(report.failed.iter().cloned());
        self.errors.push(err);
    }

    pub fn report(&self) -> &BatchReport {
        &self.report
    }

    /// Finish the batch: the report when everything succeeded, otherwise an
    /// error built by `kind` with every per-item failure attached as a child.
    #[track_caller]
    pub fn finish<K, F>(self, kind: F) -> std::result::Result<BatchReport, exn::Exn<K>>
    where
        K: std::error::Error + Send + Sync + 'static,
        F: FnOnce(BatchReport) -> K,
    {
        if self.report.is_complete() {
            return Ok(self.report);
        }
        Err(exn::Exn::raise_all(kind(self.report), self.errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_kinds() {
        let err = IoError::from(std::io::ErrorKind::NotFound);
        assert!(matches!(ErrorKind::from_io(err, "/tmp/x"), ErrorKind::NotFound(p) if p == "/tmp/x"));
        let err = IoError::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(ErrorKind::from_io(err, "/tmp/x"), ErrorKind::PermissionDenied(_)));
        let err = IoError::other("boom");
        assert!(matches!(ErrorKind::from_io(err, "/tmp/x"), ErrorKind::Io(_)));
        let err = IoError::from(std::io::ErrorKind::CrossesDevices);
        assert!(matches!(ErrorKind::from_io(err, "/tmp/x"), ErrorKind::Unsupported(p) if p.starts_with("/tmp/x")));
    }

    #[test]
    fn test_batch_success_returns_report() {
        let mut batch: Batch = Batch::new();
        batch.succeeded("a");
        batch.succeeded("b");
        let report = batch.finish(ErrorKind::PartialFailure).unwrap();
        assert_eq!(report.total(), 2);
        assert!(report.is_complete());
    }

    #[test]
    fn test_batch_failure_keeps_children() {
        let mut batch: Batch = Batch::new();
        batch.succeeded("a");
        batch.failed("b", exn::Exn::from(ErrorKind::PermissionDenied("b".into())));
        batch.succeeded("c");
        let err = batch.finish(ErrorKind::PartialFailure).unwrap_err();
        let ErrorKind::PartialFailure(report) = &*err else {
            panic!("expected partial failure, got {err}");
        };
        assert_eq!(report.succeeded, vec!["a", "c"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].item, "b");
        assert_eq!(err.frame().children().len(), 1);
    }

    #[test]
    fn test_absorb_partial_merges_items() {
        let mut nested: Batch = Batch::new();
        nested.succeeded("dir/a");
        nested.failed("dir/b", exn::Exn::from(ErrorKind::PermissionDenied("dir/b".into())));
        let nested_err = nested.finish(ErrorKind::PartialFailure).unwrap_err();
        let ErrorKind::PartialFailure(nested_report) = &*nested_err else {
            panic!("expected partial failure");
        };
        let nested_report = nested_report.clone();

        let mut batch: Batch = Batch::new();
        batch.succeeded("file");
        batch.absorb_partial(&nested_report, nested_err);
        let err = batch.finish(ErrorKind::PartialFailure).unwrap_err();
        let ErrorKind::PartialFailure(report) = &*err else {
            panic!("expected partial failure");
        };
        assert_eq!(report.succeeded, vec!["file", "dir/a"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(err.frame().children().len(), 1);
        assert_eq!(err.frame().children()[0].children().len(), 1);
    }

    #[test]
    fn test_summary_line() {
        let report = BatchReport {
            succeeded: vec!["a".into(), "b".into()],
            failed: vec![
                Failure { item: "c".into(), cause: "permission denied: c".into() },
                Failure { item: "d".into(), cause: "not found: d".into() },
            ],
        };
        assert_eq!(report.summary_line(1), "2 of 4 succeeded; c: permission denied: c; and 1 more");
        assert_eq!(
            ErrorKind::PartialFailure(report).to_string(),
            "partial failure: 2 of 4 succeeded; c: permission denied: c; d: not found: d"
        );
    }
}
