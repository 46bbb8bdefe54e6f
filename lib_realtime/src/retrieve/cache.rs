//! # Response Cache & In-Flight Registry
//!
//! Two in-memory structures backing [`super::client::CachedClient`]:
//!
//! - [`ResponseCache`]: successful GET responses keyed by a canonical request
//!   key, expiring lazily after a TTL (5 minutes by default). Mutating calls
//!   evict entries whose key contains a resource pattern.
//! - [`InflightRegistry`]: one shared future per canonical key, so concurrent
//!   identical requests ride a single network call.
//!
//! Canonical keys serialize query parameters and bodies with object keys
//! sorted recursively, so `{a:1,b:2}` and `{b:2,a:1}` collapse to the same
//! entry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;

use super::api_client::{ApiOutcome, RetrieveError};

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A coalescable fetch: boxed so every request shape erases to one type,
/// shared so late joiners receive a clone of the same result.
pub type SharedFetch = Shared<BoxFuture<'static, Result<ApiOutcome, RetrieveError>>>;

struct CacheEntry {
    outcome: ApiOutcome,
    stored_at: Instant,
}

/// TTL cache of successful responses.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached outcome for `key` if present and fresh. Stale
    /// entries are removed on the way out (lazy expiry).
    pub fn get(&self, key: &str) -> Option<ApiOutcome> {
        let mut entries = self.entries.lock().expect("response cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.outcome.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: &str, outcome: ApiOutcome) {
        let mut entries = self.entries.lock().expect("response cache lock poisoned");
        entries.insert(
            key.to_string(),
            CacheEntry {
                outcome,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops every entry whose key contains `pattern`. Returns how many
    /// entries were removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.entries.lock().expect("response cache lock poisoned");
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("response cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("response cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the canonical cache key for a request.
pub fn request_key(method: &str, path: &str, params: Option<&Value>, body: Option<&Value>) -> String {
    let params = params.map(canonical_value).unwrap_or_default();
    let body = body.map(canonical_value).unwrap_or_default();
    format!("{method} {path} p={params} b={body}")
}

/// Serializes a JSON value with object keys in sorted order at every level.
fn canonical_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by_key(|(key, _)| *key);
            let inner: Vec<String> = pairs
                .into_iter()
                .map(|(key, val)| format!("{:?}:{}", key, canonical_value(val)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_value).collect();
            format!("[{}]", inner.join(","))
        }
        scalar => scalar.to_string(),
    }
}

/// Tracks one shared future per canonical key so identical concurrent
/// requests coalesce into a single network call.
pub struct InflightRegistry {
    pending: Mutex<HashMap<String, SharedFetch>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the in-flight future for `key`, creating it with `make` when
    /// absent. The bool is true when this call created the future (i.e. the
    /// caller is the one actually driving the network request).
    pub fn get_or_insert(
        &self,
        key: &str,
        make: impl FnOnce() -> SharedFetch,
    ) -> (SharedFetch, bool) {
        let mut pending = self.pending.lock().expect("inflight registry lock poisoned");
        if let Some(existing) = pending.get(key) {
            (existing.clone(), false)
        } else {
            let fetch = make();
            pending.insert(key.to_string(), fetch.clone());
            (fetch, true)
        }
    }

    pub fn remove(&self, key: &str) {
        self.pending
            .lock()
            .expect("inflight registry lock poisoned")
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .expect("inflight registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InflightRegistry {
    fn default() -> Self {
        Self::new()
    }
}
