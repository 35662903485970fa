//! TTL-expiring, LRU-bounded cache for remote backend call results.
//!
//! Entries are keyed by a BLAKE3 hash of the operation name and its
//! parameters in sorted order, and tagged with a [`Scope`] so writes can
//! invalidate related entries without knowing their exact keys.
//!
//! All access goes through a single [`Mutex`]; every operation is a hash map
//! lookup or a bounded linear scan, so one coarse lock is enough. Results of
//! [`Cache::get_or_compute`] are computed *outside* the lock.

use crate::models::{Entry, StatResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default time-to-live of a cached result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Default upper bound on the number of cached results.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

pub type CacheKey = blake3::Hash;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL, max_entries: DEFAULT_MAX_ENTRIES }
    }
}

/// Tags attached to every entry for targeted invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub bucket: String,
    /// Object key or listing prefix the entry describes.
    pub key: String,
    pub operation: &'static str,
}
impl Scope {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, operation: &'static str) -> Self {
        Self { bucket: bucket.into(), key: key.into(), operation }
    }

    fn is_directory_shaped(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }
}

/// Cached value. Only successful backend results are ever stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Flag(bool),
    Stat(Option<StatResult>),
    Listing(Arc<[Entry]>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Entries past their TTL that no lookup has evicted yet.
    pub expired_entries: usize,
    pub max_entries: usize,
    pub default_ttl: Duration,
}

struct CacheEntry {
    payload: Payload,
    created_at: Instant,
    last_access_at: Instant,
    /// Tie-breaker for entries touched within the same clock tick.
    access_seq: u64,
    ttl: Duration,
    scope: Scope,
}
impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<CacheKey, CacheEntry>,
    sequence: u64,
    /// Per-bucket counters bumped by every invalidation in that bucket; a
    /// result computed across a bump of its own bucket is never stored.
    generations: HashMap<String, u64>,
    /// Bumped by [`Cache::clear`], which affects every bucket.
    epoch: u64,
}
impl State {
    fn next_seq(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn generation(&self, bucket: &str) -> (u64, u64) {
        (self.epoch, self.generations.get(bucket).copied().unwrap_or(0))
    }

    /// Drop the entries of `bucket` matching `predicate`.
    fn remove_where(&mut self, bucket: &str, mut predicate: impl FnMut(&Scope) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !(entry.scope.bucket == bucket && predicate(&entry.scope)));
        *self.generations.entry(bucket.to_string()).or_default() += 1;
        before - self.entries.len()
    }
}

/// Stable hash of an operation and its parameters. Parameter order does not
/// matter: they are sorted by name before hashing.
pub fn cache_key(operation: &str, params: &[(&str, &str)]) -> CacheKey {
    let mut sorted = params.to_vec();
    sorted.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    hasher.update(operation.as_bytes());
    for (name, value) in sorted {
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hasher.finalize()
}

pub struct Cache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, state: Mutex::new(State::default()) }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Look up a live entry, refreshing its LRU position. Expired entries are
    /// evicted and reported as absent.
    pub fn get(&self, operation: &str, params: &[(&str, &str)]) -> Option<Payload> {
        let key = cache_key(operation, params);
        let mut state = self.state.lock();
        self.lookup(&mut state, &key)
    }

    /// Store a payload. `ttl` defaults to the configured TTL.
    pub fn insert(
        &self,
        operation: &str,
        params: &[(&str, &str)],
        scope: Scope,
        payload: Payload,
        ttl: Option<Duration>,
    ) {
        let key = cache_key(operation, params);
        let mut state = self.state.lock();
        self.store(&mut state, key, scope, payload, ttl);
    }

    /// Return the cached payload, or run `compute` and cache its result.
    ///
    /// Errors are propagated and never cached. If the scope's bucket is
    /// invalidated (or the cache cleared) while `compute` is running, its
    /// result is returned but not stored.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        operation: &str,
        params: &[(&str, &str)],
        scope: Scope,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<Payload, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Payload, E>>,
    {
        let key = cache_key(operation, params);
        let generation = {
            let mut state = self.state.lock();
            if let Some(payload) = self.lookup(&mut state, &key) {
                tracing::debug!(operation, bucket = %scope.bucket, key = %scope.key, "cache hit");
                return Ok(payload);
            }
            state.generation(&scope.bucket)
        };
        tracing::debug!(operation, bucket = %scope.bucket, key = %scope.key, "cache miss");
        let payload = compute().await?;
        let mut state = self.state.lock();
        if state.generation(&scope.bucket) == generation {
            self.store(&mut state, key, scope, payload.clone(), ttl);
        } else {
            tracing::debug!(operation, "discarding result computed across an invalidation");
        }
        Ok(payload)
    }

    /// Drop entries describing exactly `key`, treating `a/b` and `a/b/` as the
    /// same path.
    pub fn invalidate_key(&self, bucket: &str, key: &str) -> usize {
        let base = key.trim_end_matches('/');
        let removed =
            self.state.lock().remove_where(bucket, |scope| scope.key.trim_end_matches('/') == base);
        tracing::debug!(bucket, key, removed, "invalidated key");
        removed
    }

    /// Drop every entry under `prefix`, plus every directory-shaped entry
    /// (listings, prefix checks) whose prefix encloses `prefix`.
    pub fn invalidate_prefix(&self, bucket: &str, prefix: &str) -> usize {
        let removed = self.state.lock().remove_where(bucket, |scope| {
            scope.key.starts_with(prefix) || (scope.is_directory_shaped() && prefix.starts_with(&scope.key))
        });
        tracing::debug!(bucket, prefix, removed, "invalidated prefix");
        removed
    }

    pub fn invalidate_bucket(&self, bucket: &str) -> usize {
        let removed = self.state.lock().remove_where(bucket, |_| true);
        tracing::debug!(bucket, removed, "invalidated bucket");
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let state = self.state.lock();
        CacheStats {
            total_entries: state.entries.len(),
            expired_entries: state.entries.values().filter(|entry| entry.is_expired(now)).count(),
            max_entries: self.config.max_entries,
            default_ttl: self.config.ttl,
        }
    }

    fn lookup(&self, state: &mut State, key: &CacheKey) -> Option<Payload> {
        let now = self.clock.now();
        let expired = state.entries.get(key)?.is_expired(now);
        if expired {
            state.entries.remove(key);
            return None;
        }
        let seq = state.next_seq();
        let entry = state.entries.get_mut(key)?;
        entry.last_access_at = now;
        entry.access_seq = seq;
        Some(entry.payload.clone())
    }

    fn store(&self, state: &mut State, key: CacheKey, scope: Scope, payload: Payload, ttl: Option<Duration>) {
        if self.config.max_entries == 0 {
            return;
        }
        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_entries {
            Self::evict_lru(state);
        }
        let now = self.clock.now();
        let access_seq = state.next_seq();
        state.entries.insert(
            key,
            CacheEntry {
                payload,
                created_at: now,
                last_access_at: now,
                access_seq,
                ttl: ttl.unwrap_or(self.config.ttl),
                scope,
            },
        );
    }

    fn evict_lru(state: &mut State) {
        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.last_access_at, entry.access_seq))
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            state.entries.remove(&key);
        }
    }
}
