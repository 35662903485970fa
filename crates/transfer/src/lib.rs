//! Cross-backend copy, move and delete for duopane.
//!
//! A [`TransferEngine`] drives pairs of [`duopane_storage::Path`] values and
//! never sees a backend directly: local to local, local to remote, archive to
//! local and every other pairing go through the same code. Progress arrives
//! through a throttled callback and a [`CancelToken`] stops the work between
//! chunks.

mod engine;
pub mod error;
mod plan;
mod progress;

pub use crate::engine::{DEFAULT_PROGRESS_INTERVAL, Summary, TransferEngine, TransferJob, TransferOptions};
pub use crate::error::{Error, ErrorKind, Result, storage_kind};
pub use crate::progress::{CancelToken, Progress, ProgressFn};
