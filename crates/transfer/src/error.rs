//! Transfer Error Types
//!
//! Uses [`exn`] for automatic location tracking and error tree construction.
//! Storage failures are kept as child frames, so the storage-level kind
//! (`NotFound`, `PermissionDenied`...) stays inspectable through
//! [`storage_kind()`].

use derive_more::{Display, Error};
use duopane_storage::{BatchReport, ErrorKind as StorageErrorKind};

/// A transfer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The cancel token fired. Nothing after the last completed file was
    /// written.
    #[display("transfer cancelled")]
    Cancelled,
    /// Destination is the source itself or lies beneath it.
    #[display("cannot transfer {_0} into itself")]
    IntoItself(#[error(not(source))] String),
    #[display("destination is read-only: {_0}")]
    ReadOnlyDestination(#[error(not(source))] String),
    /// Moving or deleting would have to remove items from read-only storage.
    #[display("source is read-only: {_0}")]
    ReadOnlySource(#[error(not(source))] String),
    /// A single-item storage operation failed; the storage error is the
    /// child frame.
    #[display("storage operation failed")]
    Storage,
    /// Some items of a recursive transfer failed.
    #[display("{_0}")]
    PartialFailure(#[error(not(source))] BatchReport),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}

/// The storage error a transfer error was raised from, if any.
pub fn storage_kind(err: &Error) -> Option<&StorageErrorKind> {
    err.frame().children().iter().find_map(|child| child.error().downcast_ref::<StorageErrorKind>())
}
