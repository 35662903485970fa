//! Object store client abstraction.
//!
//! [`RemoteBackend`](crate::backend::RemoteBackend) implements path semantics
//! (virtual directories, prefix listings, recursive deletes) on top of the
//! flat key/value operations exposed here. Store implementations only talk to
//! the service; caching happens one layer up.

#[cfg(any(test, feature = "mock"))]
mod memory;
#[cfg(feature = "s3")]
mod s3;

#[cfg(any(test, feature = "mock"))]
pub use self::memory::{CallCounts, MemoryStore};
#[cfg(feature = "s3")]
pub use self::s3::{S3Config, S3Store};
use crate::backend::BoxReader;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::Cursor;
use time::OffsetDateTime;

/// Upper bound on keys per batch delete request.
pub const MAX_BATCH_DELETE: usize = 1000;

/// Part size of multipart uploads. Objects up to this size go up in a single
/// request.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub modified_at: OffsetDateTime,
}

/// A part accepted by a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based position of the part in the object.
    pub number: i32,
    pub etag: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    /// Grouped prefixes (each ending in the delimiter) when listing with a
    /// delimiter.
    pub common_prefixes: Vec<String>,
    /// Token for the next page; `None` on the last page.
    pub continuation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<char>,
    pub continuation: Option<String>,
    pub max_keys: Option<usize>,
}
impl ListRequest {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), ..Self::default() }
    }

    pub fn delimited(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn after(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Metadata of a single object, `None` if it does not exist.
    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>>;

    async fn list_page(&self, bucket: &str, request: &ListRequest) -> Result<ListPage>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Streaming download. The default buffers the whole object.
    async fn reader(&self, bucket: &str, key: &str) -> Result<BoxReader> {
        Ok(Box::pin(Cursor::new(self.get(bucket, key).await?)))
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()>;

    /// Size of each part of a multipart upload.
    fn part_size(&self) -> usize {
        DEFAULT_PART_SIZE
    }

    /// Start a multipart upload, returning its id. Nothing is visible under
    /// `key` until [`complete_upload`](Self::complete_upload).
    async fn create_upload(&self, bucket: &str, key: &str) -> Result<String>;

    async fn upload_part(&self, bucket: &str, key: &str, upload_id: &str, number: i32, data: Vec<u8>)
    -> Result<UploadedPart>;

    /// Assemble `parts` into the object, in part number order.
    async fn complete_upload(&self, bucket: &str, key: &str, upload_id: &str, parts: Vec<UploadedPart>) -> Result<()>;

    /// Discard an unfinished upload and every part sent for it.
    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    /// Server-side copy.
    async fn copy(&self, bucket: &str, from: &str, to_bucket: &str, to: &str) -> Result<()>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Delete up to [`MAX_BATCH_DELETE`] keys, returning only the keys that
    /// could not be deleted.
    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> Result<Vec<(String, Error)>>;
}
