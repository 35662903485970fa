//! Backend for locators that parsed but cannot be served.
//!
//! Constructing a [`Path`](crate::Path) never fails; a remote locator with no
//! object store configured, or an archive of unknown format, gets this
//! backend and reports the problem on first use.

use super::{BoxReader, BoxWriter, EntryStream, PathImpl};
use crate::error::{BatchReport, Error, ErrorKind, Result};
use crate::locator::Locator;
use crate::models::StatResult;
use async_trait::async_trait;

pub struct UnresolvedBackend {
    locator: Locator,
    reason: Reason,
}

#[derive(Clone, Copy)]
enum Reason {
    NoStore,
    UnknownFormat,
}

impl UnresolvedBackend {
    /// Remote locator while no object store is configured.
    pub fn no_store(locator: Locator) -> Self {
        Self { locator, reason: Reason::NoStore }
    }

    /// Archive locator whose container format is not recognised.
    pub fn unknown_format(locator: Locator) -> Self {
        Self { locator, reason: Reason::UnknownFormat }
    }

    fn error(&self) -> Error {
        Error::from(match self.reason {
            Reason::NoStore => ErrorKind::BackendUnavailable(format!("no object store configured for {}", self.locator)),
            Reason::UnknownFormat => ErrorKind::InvalidLocator(format!("unknown archive format: {}", self.locator)),
        })
    }
}

#[async_trait]
impl PathImpl for UnresolvedBackend {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn is_remote(&self) -> bool {
        matches!(self.reason, Reason::NoStore)
    }

    fn is_read_only(&self) -> bool {
        matches!(self.reason, Reason::UnknownFormat)
    }

    fn supports_directory_rename(&self) -> bool {
        false
    }

    fn supports_file_editing(&self) -> bool {
        false
    }

    async fn exists(&self) -> Result<bool> {
        Err(self.error())
    }

    async fn is_dir(&self) -> Result<bool> {
        Err(self.error())
    }

    async fn stat(&self) -> Result<StatResult> {
        Err(self.error())
    }

    fn iterdir(&self) -> EntryStream<'_> {
        let err = self.error();
        Box::pin(futures::stream::once(async move { Err(err) }))
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        Err(self.error())
    }

    async fn reader(&self) -> Result<BoxReader> {
        Err(self.error())
    }

    async fn write_bytes(&self, _data: &[u8]) -> Result<()> {
        Err(self.error())
    }

    async fn writer(&self) -> Result<BoxWriter> {
        Err(self.error())
    }

    async fn mkdir(&self, _parents: bool, _exist_ok: bool) -> Result<()> {
        Err(self.error())
    }

    async fn rmdir(&self) -> Result<()> {
        Err(self.error())
    }

    async fn unlink(&self) -> Result<()> {
        Err(self.error())
    }

    async fn rmtree(&self) -> Result<BatchReport> {
        Err(self.error())
    }

    async fn rename(&self, _target: &Locator) -> Result<()> {
        Err(self.error())
    }

    async fn copy_to(&self, _target: &Locator, _overwrite: bool) -> Result<()> {
        Err(self.error())
    }
}
