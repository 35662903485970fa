//! Backend capability trait and implementations.
//!
//! Each [`Path`](crate::Path) owns exactly one [`PathImpl`], chosen by the
//! scheme of its locator. Backends never construct `Path` values: listings
//! yield [`Entry`] values carrying a [`Locator`], and the facade turns those
//! into paths.

pub mod archive;
mod local;
mod remote;
mod unresolved;

pub use self::archive::{ArchiveBackend, ArchiveSource};
pub use self::local::LocalBackend;
pub use self::remote::RemoteBackend;
pub use self::unresolved::UnresolvedBackend;
use crate::error::{BatchReport, ErrorKind, Result};
use crate::locator::{Locator, Scheme};
use crate::models::{Entry, StatResult};
use crate::temp::{self, ExtractedFile};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = Result<Entry>> + Send + 'a>>;
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxWriter = Box<dyn ObjectWriter>;
pub type BackendHandle = Arc<dyn PathImpl + Send + Sync>;

/// Chunked write into a single destination.
///
/// Nothing is guaranteed to be visible at the destination until
/// [`commit()`](Self::commit) returns. [`abort()`](Self::abort) removes
/// whatever was written so far, so an interrupted transfer never leaves a
/// truncated file that looks complete.
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Uniform capability interface over one storage path.
///
/// Single-item operations return the first error they hit. Recursive ones
/// ([`rmtree()`](Self::rmtree), directory [`copy_to()`](Self::copy_to)) keep
/// going past per-item failures and report them together as
/// [`PartialFailure`](crate::error::ErrorKind::PartialFailure).
#[async_trait]
pub trait PathImpl: Send + Sync {
    fn locator(&self) -> &Locator;

    fn scheme(&self) -> Scheme {
        self.locator().scheme()
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn is_read_only(&self) -> bool {
        false
    }

    /// Whether renaming a directory is a cheap, atomic operation. When
    /// `false`, a directory rename copies and deletes every child.
    fn supports_directory_rename(&self) -> bool;

    /// Whether files can be written in place (e.g. by a text editor).
    fn supports_file_editing(&self) -> bool;

    fn supports_symlinks(&self) -> bool {
        false
    }

    /// The path on the local filesystem, if this backend has one.
    fn local_path(&self) -> Option<&std::path::Path> {
        None
    }

    async fn exists(&self) -> Result<bool>;

    async fn is_dir(&self) -> Result<bool>;

    async fn is_file(&self) -> Result<bool> {
        Ok(self.exists().await? && !self.is_dir().await?)
    }

    async fn is_symlink(&self) -> Result<bool> {
        Ok(false)
    }

    async fn stat(&self) -> Result<StatResult>;

    /// Lazily list direct children. Each call starts a fresh listing.
    fn iterdir(&self) -> EntryStream<'_>;

    async fn read_bytes(&self) -> Result<Vec<u8>>;

    /// Open the contents for streaming reads.
    async fn reader(&self) -> Result<BoxReader>;

    /// Create or replace the contents.
    async fn write_bytes(&self, data: &[u8]) -> Result<()>;

    /// Open the destination for chunked writes.
    async fn writer(&self) -> Result<BoxWriter>;

    /// Create an empty file. An existing path is an error unless `exist_ok`,
    /// in which case it is left as it is.
    async fn touch(&self, exist_ok: bool) -> Result<()> {
        if self.exists().await? {
            if exist_ok {
                return Ok(());
            }
            exn::bail!(ErrorKind::AlreadyExists(self.locator().to_string()));
        }
        self.write_bytes(&[]).await
    }

    async fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<()>;

    /// Remove an empty directory.
    async fn rmdir(&self) -> Result<()>;

    /// Remove a single file or link.
    async fn unlink(&self) -> Result<()>;

    /// Remove recursively, returning every removed item.
    async fn rmtree(&self) -> Result<BatchReport>;

    /// Rename within the same backend.
    async fn rename(&self, target: &Locator) -> Result<()>;

    /// Backend-native copy to another locator of the same backend.
    async fn copy_to(&self, target: &Locator, overwrite: bool) -> Result<()>;

    async fn read_link(&self) -> Result<String> {
        exn::bail!(ErrorKind::Unsupported(format!("{} does not support symbolic links", self.scheme())))
    }

    async fn symlink_to(&self, _target: &str) -> Result<()> {
        exn::bail!(ErrorKind::Unsupported(format!("{} does not support symbolic links", self.scheme())))
    }

    /// Copy the contents into a temporary file in `dir` that is removed when
    /// the returned handle is dropped.
    async fn extract_to_temp(&self, dir: &std::path::Path) -> Result<ExtractedFile> {
        let data = self.read_bytes().await?;
        temp::write_temp(dir, &self.locator().name(), &data).await
    }
}

/// Refuse a cross-scheme target for a same-backend operation.
pub(crate) fn expect_same_scheme(source: &Locator, target: &Locator) -> Result<()> {
    if source.scheme() != target.scheme() {
        exn::bail!(ErrorKind::Unsupported(format!(
            "cannot move {source} to {target} within a single backend"
        )));
    }
    Ok(())
}
