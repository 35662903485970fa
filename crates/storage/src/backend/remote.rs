//! Remote object storage backend.
//!
//! Object stores are flat: a "directory" is any key prefix ending in `/`
//! that has at least one object beneath it, optionally materialised by an
//! empty marker object named after the prefix itself. Metadata lookups and
//! listings go through the shared [`Cache`]; every mutation invalidates the
//! affected keys and enclosing listings before returning.

use super::{BoxReader, BoxWriter, EntryStream, ObjectWriter, PathImpl, expect_same_scheme};
use crate::cache::{Cache, Payload, Scope};
use crate::error::{Batch, BatchReport, Error, ErrorKind, Result};
use crate::locator::Locator;
use crate::models::{Entry, StatResult};
use crate::store::{ListRequest, MAX_BATCH_DELETE, ObjectMeta, ObjectStore, UploadedPart};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::sync::Arc;

const OP_HEAD: &str = "head";
const OP_PREFIX: &str = "has_prefix";
const OP_LIST: &str = "list";

pub struct RemoteBackend {
    locator: Locator,
    bucket: String,
    key: String,
    store: Arc<dyn ObjectStore>,
    cache: Arc<Cache>,
}

impl RemoteBackend {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, store: Arc<dyn ObjectStore>, cache: Arc<Cache>) -> Self {
        let bucket = bucket.into();
        let key = key.into();
        Self { locator: Locator::remote(bucket.clone(), key.clone()), bucket, key, store, cache }
    }

    /// Object key without any trailing separator.
    fn base(&self) -> &str {
        self.key.trim_end_matches('/')
    }

    /// Listing prefix of this path as a directory.
    fn dir_prefix(&self) -> String {
        dir_prefix_of(self.base())
    }

    fn is_bucket_root(&self) -> bool {
        self.base().is_empty()
    }

    fn child_locator(&self, key: &str) -> Locator {
        Locator::remote(self.bucket.clone(), key)
    }

    fn invalidate(&self, key: &str) {
        self.cache.invalidate_key(&self.bucket, key);
        self.cache.invalidate_prefix(&self.bucket, key);
    }

    async fn head(&self, key: &str) -> Result<Option<StatResult>> {
        let params = [("bucket", self.bucket.as_str()), ("key", key)];
        let payload = self
            .cache
            .get_or_compute(OP_HEAD, &params, Scope::new(&self.bucket, key, OP_HEAD), None, || async {
                let meta = self.store.head(&self.bucket, key).await?;
                Ok::<_, Error>(Payload::Stat(meta.map(|m| StatResult::file(m.size, m.modified_at))))
            })
            .await?;
        match payload {
            Payload::Stat(stat) => Ok(stat),
            other => exn::bail!(unexpected_payload(OP_HEAD, &other)),
        }
    }

    /// Whether anything at all lives under `prefix`.
    async fn has_prefix(&self, prefix: &str) -> Result<bool> {
        let params = [("bucket", self.bucket.as_str()), ("prefix", prefix)];
        let payload = self
            .cache
            .get_or_compute(OP_PREFIX, &params, Scope::new(&self.bucket, prefix, OP_PREFIX), None, || async {
                let page = self.store.list_page(&self.bucket, &ListRequest::new(prefix).max_keys(1)).await?;
                Ok::<_, Error>(Payload::Flag(!page.objects.is_empty() || !page.common_prefixes.is_empty()))
            })
            .await?;
        match payload {
            Payload::Flag(found) => Ok(found),
            other => exn::bail!(unexpected_payload(OP_PREFIX, &other)),
        }
    }

    /// Direct children of `prefix`, excluding its own marker object.
    async fn listing(&self, prefix: &str) -> Result<Arc<[Entry]>> {
        let params = [("bucket", self.bucket.as_str()), ("prefix", prefix)];
        let payload = self
            .cache
            .get_or_compute(OP_LIST, &params, Scope::new(&self.bucket, prefix, OP_LIST), None, || async {
                let mut entries = Vec::new();
                let mut continuation = None;
                loop {
                    let request = ListRequest::new(prefix).delimited('/').after(continuation);
                    let page = self.store.list_page(&self.bucket, &request).await?;
                    for common in page.common_prefixes {
                        entries.push(Entry::new(self.child_locator(&common), StatResult::virtual_directory()));
                    }
                    for object in page.objects.into_iter().filter(|object| object.key != prefix) {
                        entries.push(Entry::new(
                            self.child_locator(&object.key),
                            StatResult::file(object.size, object.modified_at),
                        ));
                    }
                    continuation = page.continuation;
                    if continuation.is_none() {
                        break;
                    }
                }
                tracing::debug!(bucket = %self.bucket, prefix, entries = entries.len(), "listed prefix");
                Ok::<_, Error>(Payload::Listing(entries.into()))
            })
            .await?;
        match payload {
            Payload::Listing(entries) => Ok(entries),
            other => exn::bail!(unexpected_payload(OP_LIST, &other)),
        }
    }

    /// Every object under `prefix`, recursively, bypassing the cache.
    async fn all_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.store.list_page(&self.bucket, &ListRequest::new(prefix).after(continuation)).await?;
            objects.extend(page.objects);
            continuation = page.continuation;
            if continuation.is_none() {
                return Ok(objects);
            }
        }
    }

    fn target_key<'a>(&self, target: &'a Locator) -> Result<(&'a str, &'a str)> {
        expect_same_scheme(&self.locator, target)?;
        match target {
            Locator::Remote { bucket, key } => Ok((bucket.as_str(), key.trim_end_matches('/'))),
            _ => exn::bail!(ErrorKind::InvalidLocator(target.to_string())),
        }
    }

    /// Copy every object under this directory to `to_bucket/to_base/`,
    /// returning the source keys that were copied.
    async fn copy_objects(&self, to_bucket: &str, to_base: &str, overwrite: bool, batch: &mut Batch) -> Result<Vec<String>> {
        let prefix = self.dir_prefix();
        let target_prefix = dir_prefix_of(to_base);
        let mut copied = Vec::new();
        let mut unsupported = None;
        for object in self.all_objects(&prefix).await? {
            let target = format!("{target_prefix}{}", &object.key[prefix.len()..]);
            let target_locator = Locator::remote(to_bucket, target.as_str());
            if !overwrite && !target.ends_with('/') {
                match self.store.head(to_bucket, &target).await {
                    Ok(None) => {},
                    Ok(Some(_)) => {
                        batch.failed(&target_locator, Error::from(ErrorKind::AlreadyExists(target_locator.to_string())));
                        continue;
                    },
                    Err(err) => {
                        batch.failed(&target_locator, err);
                        continue;
                    },
                }
            }
            match self.store.copy(&self.bucket, &object.key, to_bucket, &target).await {
                Ok(()) => {
                    batch.succeeded(&target_locator);
                    copied.push(object.key);
                },
                // The store cannot copy at all; no point trying the rest.
                Err(err) if matches!(&*err, ErrorKind::Unsupported(_)) => {
                    unsupported = Some(err);
                    break;
                },
                Err(err) => batch.failed(self.child_locator(&object.key), err),
            }
        }
        self.cache.invalidate_prefix(to_bucket, &target_prefix);
        self.cache.invalidate_key(to_bucket, to_base);
        match unsupported {
            Some(err) => Err(err),
            None => Ok(copied),
        }
    }

    /// Delete `keys` in batches, recording each outcome.
    async fn delete_keys(&self, keys: Vec<String>, batch: &mut Batch) -> Result<()> {
        for chunk in keys.chunks(MAX_BATCH_DELETE) {
            let failures = self.store.delete_batch(&self.bucket, chunk).await?;
            for key in chunk {
                if !failures.iter().any(|(failed, _)| failed == key) {
                    batch.succeeded(self.child_locator(key));
                }
            }
            for (key, err) in failures {
                batch.failed(self.child_locator(&key), err);
            }
        }
        Ok(())
    }
}

fn dir_prefix_of(base: &str) -> String {
    match base.is_empty() {
        true => String::new(),
        false => format!("{base}/"),
    }
}

fn unexpected_payload(operation: &str, payload: &Payload) -> ErrorKind {
    ErrorKind::BackendError(format!("cache returned {payload:?} for `{operation}`"))
}

#[async_trait]
impl PathImpl for RemoteBackend {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn supports_directory_rename(&self) -> bool {
        false
    }

    fn supports_file_editing(&self) -> bool {
        true
    }

    async fn exists(&self) -> Result<bool> {
        if self.is_bucket_root() {
            return match self.listing("").await {
                Ok(_) => Ok(true),
                Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(false),
                Err(err) => Err(err),
            };
        }
        Ok(self.head(self.base()).await?.is_some() || self.has_prefix(&self.dir_prefix()).await?)
    }

    async fn is_dir(&self) -> Result<bool> {
        match self.is_bucket_root() {
            true => self.exists().await,
            false => self.has_prefix(&self.dir_prefix()).await,
        }
    }

    async fn is_file(&self) -> Result<bool> {
        match self.is_bucket_root() {
            true => Ok(false),
            false => Ok(self.head(self.base()).await?.is_some()),
        }
    }

    async fn stat(&self) -> Result<StatResult> {
        if self.is_bucket_root() {
            return match self.exists().await? {
                true => Ok(StatResult::virtual_directory()),
                false => exn::bail!(ErrorKind::NotFound(self.locator.to_string())),
            };
        }
        if let Some(stat) = self.head(self.base()).await? {
            return Ok(stat);
        }
        if self.has_prefix(&self.dir_prefix()).await? {
            return Ok(StatResult::virtual_directory());
        }
        exn::bail!(ErrorKind::NotFound(self.locator.to_string()))
    }

    fn iterdir(&self) -> EntryStream<'_> {
        Box::pin(stream! {
            let prefix = self.dir_prefix();
            let entries = match self.listing(&prefix).await {
                Ok(entries) => entries,
                Err(err) => {
                    yield Err(err);
                    return;
                },
            };
            if entries.is_empty() && !self.is_bucket_root() {
                // Distinguish an empty directory (marker only) from no directory.
                match self.has_prefix(&prefix).await {
                    Ok(true) => {},
                    Ok(false) => {
                        yield Err(match self.head(self.base()).await {
                            Ok(Some(_)) => Error::from(ErrorKind::NotADirectory(self.locator.to_string())),
                            Ok(None) => Error::from(ErrorKind::NotFound(self.locator.to_string())),
                            Err(err) => err,
                        });
                        return;
                    },
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                }
            }
            for entry in entries.iter() {
                yield Ok(entry.clone());
            }
        })
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        if self.key.ends_with('/') || self.is_bucket_root() {
            exn::bail!(ErrorKind::IsADirectory(self.locator.to_string()));
        }
        self.store.get(&self.bucket, self.base()).await
    }

    async fn reader(&self) -> Result<BoxReader> {
        if self.key.ends_with('/') || self.is_bucket_root() {
            exn::bail!(ErrorKind::IsADirectory(self.locator.to_string()));
        }
        self.store.reader(&self.bucket, self.base()).await
    }

    async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        if self.is_bucket_root() {
            exn::bail!(ErrorKind::IsADirectory(self.locator.to_string()));
        }
        let result = self.store.put(&self.bucket, self.base(), data.to_vec()).await;
        // Invalidate even on failure: the write may have landed.
        self.invalidate(self.base());
        result
    }

    async fn writer(&self) -> Result<BoxWriter> {
        if self.is_bucket_root() {
            exn::bail!(ErrorKind::IsADirectory(self.locator.to_string()));
        }
        Ok(Box::new(RemoteWriter {
            buffer: Vec::new(),
            upload_id: None,
            parts: Vec::new(),
            bucket: self.bucket.clone(),
            key: self.base().to_string(),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
        }))
    }

    async fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<()> {
        if self.is_bucket_root() || self.exists().await? {
            if exist_ok && self.is_dir().await? {
                return Ok(());
            }
            exn::bail!(ErrorKind::AlreadyExists(self.locator.to_string()));
        }
        if !parents
            && let Some(Locator::Remote { key: parent, .. }) = self.locator.parent()
            && !parent.is_empty()
            && !self.has_prefix(&parent).await?
        {
            exn::bail!(ErrorKind::NotFound(self.child_locator(&parent).to_string()));
        }
        let marker = self.dir_prefix();
        let result = self.store.put(&self.bucket, &marker, Vec::new()).await;
        self.invalidate(&marker);
        self.invalidate(self.base());
        result
    }

    async fn rmdir(&self) -> Result<()> {
        if self.is_bucket_root() {
            exn::bail!(ErrorKind::PermissionDenied(format!("refusing to remove bucket {}", self.locator)));
        }
        let prefix = self.dir_prefix();
        let page = self.store.list_page(&self.bucket, &ListRequest::new(prefix.as_str()).max_keys(2)).await?;
        if page.objects.is_empty() && page.common_prefixes.is_empty() {
            exn::bail!(match self.store.head(&self.bucket, self.base()).await? {
                Some(_) => ErrorKind::NotADirectory(self.locator.to_string()),
                None => ErrorKind::NotFound(self.locator.to_string()),
            });
        }
        if page.objects.iter().any(|object| object.key != prefix) || !page.common_prefixes.is_empty() {
            exn::bail!(ErrorKind::DirectoryNotEmpty(self.locator.to_string()));
        }
        let result = self.store.delete(&self.bucket, &prefix).await;
        self.invalidate(&prefix);
        self.invalidate(self.base());
        result
    }

    async fn unlink(&self) -> Result<()> {
        if self.key.ends_with('/') || self.is_bucket_root() {
            exn::bail!(ErrorKind::IsADirectory(self.locator.to_string()));
        }
        // Fresh lookup: a cached "exists" must not turn into a silent no-op.
        if self.store.head(&self.bucket, self.base()).await?.is_none() {
            self.invalidate(self.base());
            exn::bail!(ErrorKind::NotFound(self.locator.to_string()));
        }
        let result = self.store.delete(&self.bucket, self.base()).await;
        self.invalidate(self.base());
        result
    }

    async fn rmtree(&self) -> Result<BatchReport> {
        if self.is_bucket_root() {
            exn::bail!(ErrorKind::PermissionDenied(format!("refusing to remove bucket {}", self.locator)));
        }
        let prefix = self.dir_prefix();
        let mut keys: Vec<String> = self.all_objects(&prefix).await?.into_iter().map(|object| object.key).collect();
        if keys.is_empty() {
            self.unlink().await?;
            let mut batch: Batch<ErrorKind> = Batch::new();
            batch.succeeded(&self.locator);
            return batch.finish(ErrorKind::PartialFailure);
        }
        // The marker goes last, so a failed run still shows the directory.
        if let Some(idx) = keys.iter().position(|key| *key == prefix) {
            let marker = keys.remove(idx);
            keys.push(marker);
        }
        let mut batch = Batch::new();
        let result = self.delete_keys(keys, &mut batch).await;
        self.invalidate(&prefix);
        self.invalidate(self.base());
        result?;
        tracing::debug!(
            locator = %self.locator,
            removed = batch.report().succeeded.len(),
            failed = batch.report().failed.len(),
            "removed tree"
        );
        batch.finish(ErrorKind::PartialFailure)
    }

    async fn rename(&self, target: &Locator) -> Result<()> {
        let (to_bucket, to_base) = self.target_key(target)?;
        if self.head(self.base()).await?.is_some() {
            let copied = self.store.copy(&self.bucket, self.base(), to_bucket, to_base).await;
            self.cache.invalidate_key(to_bucket, to_base);
            self.cache.invalidate_prefix(to_bucket, to_base);
            copied?;
            let result = self.store.delete(&self.bucket, self.base()).await;
            self.invalidate(self.base());
            return result;
        }
        if !self.has_prefix(&self.dir_prefix()).await? {
            exn::bail!(ErrorKind::NotFound(self.locator.to_string()));
        }
        // No native directory rename: copy each object, then delete only the
        // originals that made it across.
        let mut batch = Batch::new();
        let copied = self.copy_objects(to_bucket, to_base, true, &mut batch).await?;
        let result = self.delete_keys(copied, &mut batch).await;
        self.invalidate(&self.dir_prefix());
        self.invalidate(self.base());
        result?;
        batch.finish(ErrorKind::PartialFailure)?;
        Ok(())
    }

    async fn copy_to(&self, target: &Locator, overwrite: bool) -> Result<()> {
        let (to_bucket, to_base) = self.target_key(target)?;
        if self.head(self.base()).await?.is_some() {
            if !overwrite && self.store.head(to_bucket, to_base).await?.is_some() {
                exn::bail!(ErrorKind::AlreadyExists(target.to_string()));
            }
            let result = self.store.copy(&self.bucket, self.base(), to_bucket, to_base).await;
            self.cache.invalidate_key(to_bucket, to_base);
            self.cache.invalidate_prefix(to_bucket, to_base);
            return result;
        }
        if !self.has_prefix(&self.dir_prefix()).await? {
            exn::bail!(ErrorKind::NotFound(self.locator.to_string()));
        }
        let mut batch = Batch::new();
        self.copy_objects(to_bucket, to_base, overwrite, &mut batch).await?;
        batch.finish(ErrorKind::PartialFailure)?;
        Ok(())
    }
}

/// Uploads the object in parts of the store's part size once it outgrows a
/// single part. Smaller objects go up in one request on commit. Nothing is
/// visible remotely before commit.
struct RemoteWriter {
    buffer: Vec<u8>,
    upload_id: Option<String>,
    parts: Vec<UploadedPart>,
    bucket: String,
    key: String,
    store: Arc<dyn ObjectStore>,
    cache: Arc<Cache>,
}

impl RemoteWriter {
    /// Send up to one part's worth of buffered data, starting the multipart
    /// upload on first use.
    async fn flush_part(&mut self) -> Result<()> {
        let upload_id = match &self.upload_id {
            Some(upload_id) => upload_id.clone(),
            None => {
                let upload_id = self.store.create_upload(&self.bucket, &self.key).await?;
                tracing::debug!(bucket = %self.bucket, key = %self.key, %upload_id, "started multipart upload");
                self.upload_id = Some(upload_id.clone());
                upload_id
            },
        };
        let number = i32::try_from(self.parts.len() + 1)
            .or_raise(|| ErrorKind::BackendError(format!("remote://{}/{}: too many parts", self.bucket, self.key)))?;
        let rest = self.buffer.split_off(self.store.part_size().min(self.buffer.len()));
        let data = std::mem::replace(&mut self.buffer, rest);
        let part = self.store.upload_part(&self.bucket, &self.key, &upload_id, number, data).await?;
        self.parts.push(part);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let Some(upload_id) = self.upload_id.clone() else {
            return self.store.put(&self.bucket, &self.key, std::mem::take(&mut self.buffer)).await;
        };
        if !self.buffer.is_empty() {
            self.flush_part().await?;
        }
        let parts = std::mem::take(&mut self.parts);
        self.store.complete_upload(&self.bucket, &self.key, &upload_id, parts).await
    }

    async fn abandon_upload(&mut self) {
        if let Some(upload_id) = self.upload_id.take()
            && let Err(err) = self.store.abort_upload(&self.bucket, &self.key, &upload_id).await
        {
            tracing::warn!(bucket = %self.bucket, key = %self.key, %upload_id, error = %err, "cannot abort multipart upload");
        }
    }
}

#[async_trait]
impl ObjectWriter for RemoteWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        while self.buffer.len() > self.store.part_size() {
            self.flush_part().await?;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let result = self.finish().await;
        if result.is_err() {
            self.abandon_upload().await;
        }
        self.cache.invalidate_key(&self.bucket, &self.key);
        self.cache.invalidate_prefix(&self.bucket, &self.key);
        if result.is_ok() {
            tracing::debug!(bucket = %self.bucket, key = %self.key, "committed object");
        }
        result
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.abandon_upload().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use futures::TryStreamExt;

    fn fixture(store: MemoryStore) -> (Arc<MemoryStore>, Arc<Cache>) {
        (Arc::new(store), Arc::new(Cache::default()))
    }

    fn path(store: &Arc<MemoryStore>, cache: &Arc<Cache>, key: &str) -> RemoteBackend {
        let store: Arc<dyn ObjectStore> = store.clone();
        RemoteBackend::new("bucket", key, store, Arc::clone(cache))
    }

    async fn names(backend: &RemoteBackend) -> Vec<String> {
        let entries: Vec<Entry> = backend.iterdir().try_collect().await.unwrap();
        entries.into_iter().map(|e| e.locator.to_string()).collect()
    }

    #[tokio::test]
    async fn test_virtual_directory() {
        let (store, cache) = fixture(MemoryStore::new().with_object("bucket", "photos/2024/img.jpg", b"jpeg".to_vec()));
        let dir = path(&store, &cache, "photos/2024/");
        assert!(dir.exists().await.unwrap());
        assert!(dir.is_dir().await.unwrap());
        assert!(!dir.is_file().await.unwrap());
        assert_eq!(dir.stat().await.unwrap(), StatResult::virtual_directory());
        // The same directory without its trailing separator.
        assert!(path(&store, &cache, "photos/2024").is_dir().await.unwrap());
        assert_eq!(names(&path(&store, &cache, "photos/")).await, vec!["remote://bucket/photos/2024/"]);
        assert_eq!(names(&dir).await, vec!["remote://bucket/photos/2024/img.jpg"]);
    }

    #[tokio::test]
    async fn test_write_then_read_after_cached_miss() {
        let (store, cache) = fixture(MemoryStore::new().with_bucket("bucket"));
        let file = path(&store, &cache, "notes/todo.txt");
        let parent = path(&store, &cache, "notes/");
        assert!(!file.exists().await.unwrap());
        assert!(!parent.exists().await.unwrap());
        file.write_bytes(b"buy milk").await.unwrap();
        assert!(file.exists().await.unwrap());
        assert_eq!(file.stat().await.unwrap().size, 8);
        assert_eq!(file.read_bytes().await.unwrap(), b"buy milk");
        assert!(parent.is_dir().await.unwrap());
        assert_eq!(names(&path(&store, &cache, "")).await, vec!["remote://bucket/notes/"]);
    }

    #[tokio::test]
    async fn test_metadata_is_cached() {
        let (store, cache) = fixture(MemoryStore::new().with_object("bucket", "a.txt", b"a".to_vec()));
        let file = path(&store, &cache, "a.txt");
        for _ in 0..3 {
            assert!(file.exists().await.unwrap());
            assert_eq!(file.stat().await.unwrap().size, 1);
        }
        assert_eq!(store.calls().head, 1);
    }

    #[tokio::test]
    async fn test_listing_spans_pages() {
        let mut store = MemoryStore::new().with_page_size(2);
        for idx in 0..5 {
            store = store.with_object("bucket", format!("dir/{idx}.txt"), b"x".to_vec());
        }
        let (store, cache) = fixture(store);
        assert_eq!(names(&path(&store, &cache, "dir/")).await.len(), 5);
        assert_eq!(store.calls().list, 3);
    }

    #[tokio::test]
    async fn test_iterdir_errors() {
        let (store, cache) = fixture(MemoryStore::new().with_object("bucket", "file.txt", b"x".to_vec()));
        let err = path(&store, &cache, "file.txt").iterdir().try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotADirectory(_)));
        let err = path(&store, &cache, "missing/").iterdir().try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mkdir_and_rmdir() {
        let (store, cache) = fixture(MemoryStore::new().with_bucket("bucket"));
        let dir = path(&store, &cache, "empty");
        let nested = path(&store, &cache, "a/b/c");
        assert!(matches!(&*nested.mkdir(false, false).await.unwrap_err(), ErrorKind::NotFound(_)));
        nested.mkdir(true, false).await.unwrap();
        dir.mkdir(false, false).await.unwrap();
        assert!(dir.is_dir().await.unwrap());
        assert!(names(&dir).await.is_empty());
        assert!(matches!(&*dir.mkdir(false, false).await.unwrap_err(), ErrorKind::AlreadyExists(_)));
        dir.mkdir(false, true).await.unwrap();

        path(&store, &cache, "empty/file.txt").write_bytes(b"x").await.unwrap();
        assert!(matches!(&*dir.rmdir().await.unwrap_err(), ErrorKind::DirectoryNotEmpty(_)));
        path(&store, &cache, "empty/file.txt").unlink().await.unwrap();
        dir.rmdir().await.unwrap();
        assert!(!dir.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_unlink_missing() {
        let (store, cache) = fixture(MemoryStore::new().with_bucket("bucket"));
        let err = path(&store, &cache, "ghost.txt").unlink().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rmtree_reports_only_denied_keys() {
        let mut store = MemoryStore::new().with_object("bucket", "tree/", Vec::new());
        for idx in 0..5 {
            store = store.with_object("bucket", format!("tree/{idx}.txt"), b"x".to_vec());
        }
        let (store, cache) = fixture(store);
        store.deny("bucket", "tree/3.txt");
        let tree = path(&store, &cache, "tree");
        let err = tree.rmtree().await.unwrap_err();
        let ErrorKind::PartialFailure(report) = &*err else {
            panic!("expected partial failure, got {err}");
        };
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].item, "remote://bucket/tree/3.txt");
        assert_eq!(report.succeeded.len(), 5);
        assert_eq!(store.keys("bucket").await, vec!["tree/3.txt"]);
        // Listings reflect the deletion immediately.
        assert_eq!(names(&tree).await, vec!["remote://bucket/tree/3.txt"]);
    }

    #[tokio::test]
    async fn test_rmtree_refuses_bucket_root() {
        let (store, cache) = fixture(MemoryStore::new().with_object("bucket", "a", b"x".to_vec()));
        let err = path(&store, &cache, "").rmtree().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PermissionDenied(_)));
        assert_eq!(store.keys("bucket").await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_rename_directory() {
        let (store, cache) = fixture(
            MemoryStore::new()
                .with_object("bucket", "old/a.txt", b"a".to_vec())
                .with_object("bucket", "old/sub/b.txt", b"b".to_vec()),
        );
        let old = path(&store, &cache, "old/");
        assert!(old.exists().await.unwrap());
        old.rename(&Locator::remote("bucket", "new/")).await.unwrap();
        assert_eq!(store.keys("bucket").await, vec!["new/a.txt", "new/sub/b.txt"]);
        assert!(!old.exists().await.unwrap());
        assert!(path(&store, &cache, "new").is_dir().await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_to_conflict() {
        let (store, cache) = fixture(
            MemoryStore::new()
                .with_object("bucket", "a.txt", b"new".to_vec())
                .with_object("bucket", "b.txt", b"old".to_vec()),
        );
        let source = path(&store, &cache, "a.txt");
        let target = Locator::remote("bucket", "b.txt");
        let err = source.copy_to(&target, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        source.copy_to(&target, true).await.unwrap();
        assert_eq!(store.get("bucket", "b.txt").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_writer_commits_once() {
        let (store, cache) = fixture(MemoryStore::new().with_bucket("bucket"));
        let file = path(&store, &cache, "big.bin");
        let mut writer = file.writer().await.unwrap();
        writer.write_chunk(b"ab").await.unwrap();
        writer.write_chunk(b"cd").await.unwrap();
        assert!(!file.exists().await.unwrap());
        writer.commit().await.unwrap();
        assert_eq!(file.read_bytes().await.unwrap(), b"abcd");
        assert_eq!(store.calls().put, 1);

        let mut aborted = path(&store, &cache, "aborted.bin").writer().await.unwrap();
        aborted.write_chunk(b"zz").await.unwrap();
        aborted.abort().await.unwrap();
        assert!(store.head("bucket", "aborted.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_conflict_check_still_refreshes_listing() {
        let (store, cache) = fixture(
            MemoryStore::new()
                .with_object("bucket", "src/a.txt", b"a".to_vec())
                .with_object("bucket", "src/b.txt", b"b".to_vec())
                .with_object("bucket", "dst/keep.txt", b"k".to_vec()),
        );
        let dst = path(&store, &cache, "dst/");
        assert_eq!(names(&dst).await, vec!["remote://bucket/dst/keep.txt"]);
        store.fail_lookup("bucket", "dst/b.txt");

        let err = path(&store, &cache, "src/").copy_to(&Locator::remote("bucket", "dst"), false).await.unwrap_err();
        let ErrorKind::PartialFailure(report) = &*err else {
            panic!("expected partial failure, got {err}");
        };
        assert_eq!(report.succeeded, vec!["remote://bucket/dst/a.txt"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].item, "remote://bucket/dst/b.txt");
        assert_eq!(names(&dst).await, vec!["remote://bucket/dst/a.txt", "remote://bucket/dst/keep.txt"]);
    }

    #[tokio::test]
    async fn test_failed_file_rename_refreshes_target() {
        let (store, cache) = fixture(MemoryStore::new().with_object("bucket", "a.txt", b"a".to_vec()));
        let target = path(&store, &cache, "b.txt");
        assert!(!target.exists().await.unwrap());
        store.deny("bucket", "b.txt");
        let err = path(&store, &cache, "a.txt").rename(&Locator::remote("bucket", "b.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PermissionDenied(_)));
        let lookups = store.calls().head;
        assert!(!target.exists().await.unwrap());
        assert!(store.calls().head > lookups);
        assert!(path(&store, &cache, "a.txt").exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_large_writer_uploads_in_parts() {
        let (store, cache) = fixture(MemoryStore::new().with_bucket("bucket").with_part_size(4));
        let file = path(&store, &cache, "big.bin");
        let mut writer = file.writer().await.unwrap();
        writer.write_chunk(b"abcdef").await.unwrap();
        writer.write_chunk(b"ghij").await.unwrap();
        assert_eq!(store.calls().part, 2);
        assert!(!file.exists().await.unwrap());
        writer.commit().await.unwrap();
        assert_eq!(file.read_bytes().await.unwrap(), b"abcdefghij");
        assert_eq!(store.calls().part, 3);
        assert_eq!(store.pending_uploads(), 0);

        let mut aborted = path(&store, &cache, "aborted.bin").writer().await.unwrap();
        aborted.write_chunk(b"0123456789").await.unwrap();
        assert_eq!(store.pending_uploads(), 1);
        aborted.abort().await.unwrap();
        assert_eq!(store.pending_uploads(), 0);
        assert!(store.head("bucket", "aborted.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_completion_aborts_upload() {
        let (store, cache) = fixture(MemoryStore::new().with_bucket("bucket").with_part_size(2));
        let mut writer = path(&store, &cache, "denied.bin").writer().await.unwrap();
        writer.write_chunk(b"abcde").await.unwrap();
        store.deny("bucket", "denied.bin");
        let err = writer.commit().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PermissionDenied(_)));
        assert_eq!(store.pending_uploads(), 0);
        assert!(store.keys("bucket").await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let (store, cache) = fixture(MemoryStore::new().with_object("bucket", "a.txt", b"a".to_vec()));
        store.set_unavailable(true);
        let err = path(&store, &cache, "a.txt").stat().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendUnavailable(_)));
        assert!(err.is_retryable());
        // Failures are never cached.
        store.set_unavailable(false);
        assert_eq!(path(&store, &cache, "a.txt").stat().await.unwrap().size, 1);
    }
}
