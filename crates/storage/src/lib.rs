//! Unified storage for duopane.
//!
//! A [`Path`] works the same whether it points at a local file, an object in a
//! remote bucket (`remote://bucket/key`) or a member of an archive
//! (`/data/backup.tar.gz#etc/hosts`). Paths are resolved through a [`Storage`],
//! which owns the remote metadata [`Cache`], the optional object store client
//! and the registry of opened archives.
//!
//! ```no_run
//! # async fn demo() -> duopane_storage::error::Result<()> {
//! use duopane_storage::Storage;
//!
//! let storage = Storage::local_only();
//! let notes = storage.path("/home/me/notes.txt");
//! notes.write_text("remember the milk").await?;
//! assert!(notes.exists().await?);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod error;
mod locator;
mod models;
mod path;
mod storage;
pub mod store;
mod temp;

pub use crate::cache::{Cache, CacheConfig, CacheStats};
pub use crate::error::{BatchReport, Error, ErrorKind, Failure, Result};
pub use crate::locator::{ARCHIVE_SCHEME, ENTRY_SEPARATOR, Locator, REMOTE_SCHEME, Scheme};
pub use crate::models::{Entry, StatResult};
pub use crate::path::{COPY_CHUNK_SIZE, LocalFile, Path};
pub use crate::storage::{Storage, StorageBuilder};
pub use crate::temp::{ARCHIVE_TEMP_PREFIX, EXTRACT_TEMP_PREFIX, ExtractedFile, sweep_stale_temp_files};
