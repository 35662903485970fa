//! In-memory object store for testing.

use super::{ListPage, ListRequest, ObjectMeta, ObjectStore, UploadedPart};
use crate::error::{Error, ErrorKind, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

type Bucket = BTreeMap<String, (OffsetDateTime, Vec<u8>)>;

/// Number of store calls made, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub head: usize,
    pub list: usize,
    pub get: usize,
    pub put: usize,
    pub copy: usize,
    pub delete: usize,
    pub part: usize,
}

#[derive(Default)]
struct Counters {
    head: AtomicUsize,
    list: AtomicUsize,
    get: AtomicUsize,
    put: AtomicUsize,
    copy: AtomicUsize,
    delete: AtomicUsize,
    part: AtomicUsize,
}
impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-memory object store.
///
/// Buckets are flat sorted maps behind a [`RwLock`], so listings come back in
/// key order like a real service. Buckets must be created up front; anything
/// addressed to an unknown bucket fails with `NotFound`.
pub struct MemoryStore {
    name: String,
    buckets: RwLock<HashMap<String, Bucket>>,
    page_size: usize,
    part_size: usize,
    denied: parking_lot::Mutex<HashSet<(String, String)>>,
    failing_lookups: parking_lot::Mutex<HashSet<(String, String)>>,
    unavailable: AtomicBool,
    server_copy: AtomicBool,
    uploads: parking_lot::Mutex<HashMap<String, Upload>>,
    next_upload: AtomicUsize,
    counters: Counters,
}

/// Parts received so far for one multipart upload.
struct Upload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Vec<u8>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            buckets: RwLock::new(HashMap::new()),
            page_size: super::MAX_BATCH_DELETE,
            part_size: super::DEFAULT_PART_SIZE,
            denied: parking_lot::Mutex::new(HashSet::new()),
            failing_lookups: parking_lot::Mutex::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
            server_copy: AtomicBool::new(true),
            uploads: parking_lot::Mutex::new(HashMap::new()),
            next_upload: AtomicUsize::new(1),
            counters: Counters::default(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.buckets.get_mut().entry(bucket.into()).or_default();
        self
    }

    /// Add an object, creating its bucket if needed.
    pub fn with_object(mut self, bucket: impl Into<String>, key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.buckets
            .get_mut()
            .entry(bucket.into())
            .or_default()
            .insert(key.into(), (OffsetDateTime::now_utc(), data.into()));
        self
    }

    /// Cap the number of items per listing page, to exercise pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Shrink multipart upload parts, to exercise multipart writes.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Make every mutation of `key` fail with `PermissionDenied`.
    pub fn deny(&self, bucket: impl Into<String>, key: impl Into<String>) {
        self.denied.lock().insert((bucket.into(), key.into()));
    }

    /// Make metadata lookups of `key` fail with `BackendUnavailable`.
    pub fn fail_lookup(&self, bucket: impl Into<String>, key: impl Into<String>) {
        self.failing_lookups.lock().insert((bucket.into(), key.into()));
    }

    /// Reject server-side copies with `Unsupported`, like a service without
    /// copy support.
    pub fn disable_server_copy(&self) {
        self.server_copy.store(false, Ordering::SeqCst);
    }

    /// Number of multipart uploads started but neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Simulate a network outage: every call fails with `BackendUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            head: c.head.load(Ordering::Relaxed),
            list: c.list.load(Ordering::Relaxed),
            get: c.get.load(Ordering::Relaxed),
            put: c.put.load(Ordering::Relaxed),
            copy: c.copy.load(Ordering::Relaxed),
            delete: c.delete.load(Ordering::Relaxed),
            part: c.part.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of every key in `bucket`, for assertions.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets.read().await.get(bucket).map(|b| b.keys().cloned().collect()).unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::BackendUnavailable(format!("{} is offline", self.name)));
        }
        Ok(())
    }

    fn check_allowed(&self, bucket: &str, key: &str) -> Result<()> {
        if self.denied.lock().contains(&(bucket.to_string(), key.to_string())) {
            exn::bail!(ErrorKind::PermissionDenied(format!("remote://{bucket}/{key}")));
        }
        Ok(())
    }

    fn no_bucket(bucket: &str) -> Error {
        Error::from(ErrorKind::NotFound(format!("remote://{bucket}/")))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>> {
        Counters::bump(&self.counters.head);
        self.check_available()?;
        if self.failing_lookups.lock().contains(&(bucket.to_string(), key.to_string())) {
            exn::bail!(ErrorKind::BackendUnavailable(format!("lookup of remote://{bucket}/{key} timed out")));
        }
        let guard = self.buckets.read().await;
        let objects = guard.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
        Ok(objects.get(key).map(|(modified_at, data)| ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            modified_at: *modified_at,
        }))
    }

    async fn list_page(&self, bucket: &str, request: &ListRequest) -> Result<ListPage> {
        Counters::bump(&self.counters.list);
        self.check_available()?;
        let guard = self.buckets.read().await;
        let objects = guard.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
        let prefix = request.prefix.as_str();
        let limit = request.max_keys.unwrap_or(self.page_size).min(self.page_size);
        let mut page = ListPage::default();
        let mut taken = 0;
        let mut last: Option<String> = None;
        for (key, (modified_at, data)) in objects.range::<str, _>((Bound::Included(prefix), Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            let grouped = request.delimiter.and_then(|delimiter| {
                key[prefix.len()..].find(delimiter).map(|idx| key[..prefix.len() + idx + delimiter.len_utf8()].to_string())
            });
            let name = grouped.clone().unwrap_or_else(|| key.clone());
            if last.as_deref() == Some(name.as_str()) {
                continue;
            }
            if request.continuation.as_deref().is_some_and(|after| name.as_str() <= after) {
                continue;
            }
            if taken == limit {
                page.continuation = last;
                return Ok(page);
            }
            match grouped {
                Some(common_prefix) => page.common_prefixes.push(common_prefix),
                None => page.objects.push(ObjectMeta {
                    key: key.clone(),
                    size: data.len() as u64,
                    modified_at: *modified_at,
                }),
            }
            taken += 1;
            last = Some(name);
        }
        Ok(page)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        Counters::bump(&self.counters.get);
        self.check_available()?;
        let guard = self.buckets.read().await;
        let objects = guard.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
        let (_modified_at, data) = objects
            .get(key)
            .ok_or_else(|| Error::from(ErrorKind::NotFound(format!("remote://{bucket}/{key}"))))?;
        Ok(data.clone())
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        Counters::bump(&self.counters.put);
        self.check_available()?;
        self.check_allowed(bucket, key)?;
        let mut guard = self.buckets.write().await;
        let objects = guard.get_mut(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
        objects.insert(key.to_string(), (OffsetDateTime::now_utc(), data));
        Ok(())
    }

    fn part_size(&self) -> usize {
        self.part_size
    }

    async fn create_upload(&self, bucket: &str, key: &str) -> Result<String> {
        self.check_available()?;
        self.check_allowed(bucket, key)?;
        if !self.buckets.read().await.contains_key(bucket) {
            return Err(Self::no_bucket(bucket));
        }
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::Relaxed));
        let upload = Upload { bucket: bucket.to_string(), key: key.to_string(), parts: BTreeMap::new() };
        self.uploads.lock().insert(upload_id.clone(), upload);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: i32,
        data: Vec<u8>,
    ) -> Result<UploadedPart> {
        Counters::bump(&self.counters.part);
        self.check_available()?;
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|upload| upload.bucket == bucket && upload.key == key)
            .ok_or_else(|| Error::from(ErrorKind::NotFound(format!("upload {upload_id} of remote://{bucket}/{key}"))))?;
        upload.parts.insert(number, data);
        Ok(UploadedPart { number, etag: Some(format!("{upload_id}-{number}")) })
    }

    async fn complete_upload(&self, bucket: &str, key: &str, upload_id: &str, parts: Vec<UploadedPart>) -> Result<()> {
        Counters::bump(&self.counters.put);
        self.check_available()?;
        self.check_allowed(bucket, key)?;
        let mut upload = self
            .uploads
            .lock()
            .remove(upload_id)
            .ok_or_else(|| Error::from(ErrorKind::NotFound(format!("upload {upload_id} of remote://{bucket}/{key}"))))?;
        let mut numbers: Vec<i32> = parts.iter().map(|part| part.number).collect();
        numbers.sort_unstable();
        let mut data = Vec::new();
        for number in numbers {
            let part = upload.parts.remove(&number).ok_or_else(|| {
                Error::from(ErrorKind::BackendError(format!("upload {upload_id} has no part {number}")))
            })?;
            data.extend_from_slice(&part);
        }
        let mut guard = self.buckets.write().await;
        let objects = guard.get_mut(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
        objects.insert(key.to_string(), (OffsetDateTime::now_utc(), data));
        Ok(())
    }

    async fn abort_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> Result<()> {
        self.check_available()?;
        self.uploads.lock().remove(upload_id);
        Ok(())
    }

    async fn copy(&self, bucket: &str, from: &str, to_bucket: &str, to: &str) -> Result<()> {
        Counters::bump(&self.counters.copy);
        self.check_available()?;
        if !self.server_copy.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unsupported(format!("{} has no server-side copy", self.name)));
        }
        self.check_allowed(to_bucket, to)?;
        let mut guard = self.buckets.write().await;
        let data = guard
            .get(bucket)
            .ok_or_else(|| Self::no_bucket(bucket))?
            .get(from)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| Error::from(ErrorKind::NotFound(format!("remote://{bucket}/{from}"))))?;
        let target = guard.get_mut(to_bucket).ok_or_else(|| Self::no_bucket(to_bucket))?;
        target.insert(to.to_string(), (OffsetDateTime::now_utc(), data));
        Ok(())
    }

    /// Deleting a missing key succeeds, as it does on S3.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        Counters::bump(&self.counters.delete);
        self.check_available()?;
        self.check_allowed(bucket, key)?;
        let mut guard = self.buckets.write().await;
        guard.get_mut(bucket).ok_or_else(|| Self::no_bucket(bucket))?.remove(key);
        Ok(())
    }

    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> Result<Vec<(String, Error)>> {
        Counters::bump(&self.counters.delete);
        self.check_available()?;
        let mut guard = self.buckets.write().await;
        let objects = guard.get_mut(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
        let mut failures = Vec::new();
        for key in keys {
            match self.check_allowed(bucket, key) {
                Ok(()) => {
                    objects.remove(key);
                },
                Err(err) => failures.push((key.clone(), err)),
            }
        }
        Ok(failures)
    }
}
