//! Composition root for paths.
//!
//! A [`Storage`] owns everything paths share: the remote metadata cache, the
//! optional object store client, the directory for temporary files, and the
//! registry of opened archive containers (so an archive's index is parsed once
//! no matter how many paths point into it).

use crate::backend::archive::ArchiveFormat;
use crate::backend::{ArchiveBackend, ArchiveSource, BackendHandle, LocalBackend, RemoteBackend, UnresolvedBackend};
use crate::cache::{Cache, CacheConfig};
use crate::error::Result;
use crate::locator::Locator;
use crate::path::Path;
use crate::store::ObjectStore;
use crate::temp;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    cache: Arc<Cache>,
    store: Option<Arc<dyn ObjectStore>>,
    temp_dir: PathBuf,
    archives: Mutex<HashMap<Locator, Arc<ArchiveSource>>>,
}

/// Cheaply cloneable handle; clones share the cache and archive registry.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<Inner>,
}

impl Storage {
    pub fn builder() -> StorageBuilder {
        StorageBuilder::default()
    }

    /// Storage without an object store: remote paths report
    /// [`BackendUnavailable`](crate::error::ErrorKind::BackendUnavailable).
    pub fn local_only() -> Self {
        Self::builder().build()
    }

    /// Resolve a locator string. Never fails.
    pub fn path(&self, locator: &str) -> Path {
        Path::new(locator, self)
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.inner.cache
    }

    pub fn store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.inner.store.as_ref()
    }

    pub fn temp_dir(&self) -> &std::path::Path {
        &self.inner.temp_dir
    }

    pub(crate) fn ptr_eq(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn backend_for(&self, locator: &Locator) -> BackendHandle {
        match locator {
            Locator::Local(path) => Arc::new(LocalBackend::new(path.clone())),
            Locator::Remote { bucket, key } => match &self.inner.store {
                Some(store) => Arc::new(RemoteBackend::new(
                    bucket.clone(),
                    key.clone(),
                    Arc::clone(store),
                    Arc::clone(&self.inner.cache),
                )),
                None => Arc::new(UnresolvedBackend::no_store(locator.clone())),
            },
            Locator::Archive { container, entry } => match self.archive_source(container) {
                Some(source) => Arc::new(ArchiveBackend::new(entry, source)),
                None => Arc::new(UnresolvedBackend::unknown_format(locator.clone())),
            },
        }
    }

    /// The shared source for a container, opened on first use. `None` when the
    /// container name does not identify a supported format.
    fn archive_source(&self, container: &Locator) -> Option<Arc<ArchiveSource>> {
        let format = ArchiveFormat::from_name(&container.name())?;
        if let Some(source) = self.inner.archives.lock().get(container) {
            return Some(Arc::clone(source));
        }
        // Resolving a nested container re-enters this registry, so the lock
        // must not be held here.
        let container_backend = self.backend_for(container);
        let source = ArchiveSource::new(container.clone(), format, container_backend, &self.inner.temp_dir);
        let mut archives = self.inner.archives.lock();
        let source = archives.entry(container.clone()).or_insert_with(|| Arc::new(source));
        Some(Arc::clone(source))
    }

    /// Drop the parsed index of a container (and of archives nested inside
    /// it), e.g. after the container file was replaced. Returns whether
    /// anything was open.
    pub fn forget_archive(&self, container: &Locator) -> bool {
        let mut archives = self.inner.archives.lock();
        let before = archives.len();
        archives.retain(|opened, _| !opened.starts_with(container) && !nested_in(opened, container));
        let forgotten = before - archives.len();
        if forgotten > 0 {
            tracing::debug!(%container, forgotten, "forgot archive index");
        }
        forgotten > 0
    }

    /// Number of archive containers currently open.
    pub fn open_archives(&self) -> usize {
        self.inner.archives.lock().len()
    }

    /// Remove temporary files older than `max_age` left behind by an earlier
    /// run.
    pub async fn sweep_temp_files(&self, max_age: Duration) -> Result<usize> {
        temp::sweep_stale_temp_files(&self.inner.temp_dir, max_age).await
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::local_only()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("store", &self.inner.store.as_ref().map(|store| store.name().to_string()))
            .field("temp_dir", &self.inner.temp_dir)
            .field("cache", &self.inner.cache.stats())
            .finish_non_exhaustive()
    }
}

fn nested_in(opened: &Locator, container: &Locator) -> bool {
    let mut current = opened.container();
    while let Some(outer) = current {
        if outer == container {
            return true;
        }
        current = outer.container();
    }
    false
}

#[derive(Default)]
pub struct StorageBuilder {
    cache_config: CacheConfig,
    cache: Option<Arc<Cache>>,
    store: Option<Arc<dyn ObjectStore>>,
    temp_dir: Option<PathBuf>,
}

impl StorageBuilder {
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Use an existing cache instead of creating one from the config.
    pub fn cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Directory for extracted members and downloaded containers. Defaults to
    /// the system temporary directory.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Storage {
        let cache = self.cache.unwrap_or_else(|| Arc::new(Cache::new(self.cache_config)));
        let temp_dir = self.temp_dir.unwrap_or_else(std::env::temp_dir);
        if let Some(store) = &self.store {
            tracing::debug!(store = store.name(), "object store configured");
        }
        Storage {
            inner: Arc::new(Inner { cache, store: self.store, temp_dir, archives: Mutex::new(HashMap::new()) }),
        }
    }
}
