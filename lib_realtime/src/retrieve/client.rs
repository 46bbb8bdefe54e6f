//! # Cached Client
//!
//! The request policy layer: decides which calls hit the cache, which
//! coalesce with an identical in-flight call, and which cached entries a
//! mutating call must evict. All actual I/O goes through the injected
//! [`HttpTransport`].
//!
//! ## Policy Summary:
//! - Only GET requests are cacheable, and only when the caller has not asked
//!   for a bypass and the path does not match a never-cache pattern (cart
//!   state is too volatile to serve stale).
//! - A cache miss registers a shared future keyed by the canonical request
//!   key; any identical request arriving before completion awaits the same
//!   future and receives a clone of its outcome.
//! - Only successful outcomes are cached. Failures propagate to every
//!   coalesced waiter and leave the cache untouched, so the next attempt
//!   retries the network.
//! - Successful non-GET requests evict cache entries for resource families
//!   the write may have touched.

use std::sync::Arc;

use futures_util::FutureExt;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::api_client::{ApiOutcome, HttpTransport, RetrieveError, TransportRequest};
use super::cache::{request_key, InflightRegistry, ResponseCache, SharedFetch};

/// Paths never served from cache, regardless of method.
const NEVER_CACHE_PATTERNS: &[&str] = &["cart"];

/// Resource families evicted after any successful mutating call.
const WRITE_INVALIDATION_PATTERNS: &[&str] =
    &["products", "categories", "users", "cart", "notifications"];

/// Per-request caller options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Skip the cache for this request even if it would be cacheable.
    pub no_cache: bool,
}

/// Caching, coalescing front door to the backend REST API.
pub struct CachedClient {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<ResponseCache>,
    inflight: Arc<InflightRegistry>,
    never_cache: Vec<String>,
    invalidate_on_write: Vec<String>,
}

impl CachedClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_cache(transport, Arc::new(ResponseCache::new()))
    }

    /// Builds a client over an externally-owned cache, mainly so tests can
    /// shorten the TTL.
    pub fn with_cache(transport: Arc<dyn HttpTransport>, cache: Arc<ResponseCache>) -> Self {
        Self {
            transport,
            cache,
            inflight: Arc::new(InflightRegistry::new()),
            never_cache: NEVER_CACHE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            invalidate_on_write: WRITE_INVALIDATION_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Issues a request through the cache/coalescing policy.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: Option<Value>,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiOutcome, RetrieveError> {
        let cacheable = method == Method::GET && !options.no_cache && !self.never_cached(path);

        if !cacheable {
            let outcome = self
                .transport
                .execute(TransportRequest {
                    method: method.clone(),
                    path: path.to_string(),
                    params,
                    body,
                })
                .await?;
            if outcome.success && method != Method::GET {
                self.apply_write_invalidation(path);
            }
            return Ok(outcome);
        }

        let key = request_key(method.as_str(), path, params.as_ref(), body.as_ref());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let (fetch, created) = self.inflight.get_or_insert(&key, || {
            self.make_fetch(
                key.clone(),
                TransportRequest {
                    method,
                    path: path.to_string(),
                    params,
                    body,
                },
            )
        });
        if !created {
            debug!(%key, "joining in-flight request");
        }
        fetch.await
    }

    /// Convenience wrapper for `GET` with default options.
    pub async fn get(&self, path: &str, params: Option<Value>) -> Result<ApiOutcome, RetrieveError> {
        self.request(Method::GET, path, params, None, RequestOptions::default())
            .await
    }

    /// Evicts cache entries whose key contains `pattern`.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn never_cached(&self, path: &str) -> bool {
        self.never_cache.iter().any(|p| path.contains(p.as_str()))
    }

    fn apply_write_invalidation(&self, path: &str) {
        for pattern in &self.invalidate_on_write {
            if path.contains(pattern.as_str()) {
                let dropped = self.cache.invalidate(pattern);
                if dropped > 0 {
                    debug!(pattern = %pattern, dropped, "write invalidated cached responses");
                }
            }
        }
    }

    /// Builds the shared fetch future driving one network call for `key`.
    /// Caches successful outcomes and always deregisters itself before
    /// resolving, so a failed key can be retried immediately.
    fn make_fetch(&self, key: String, request: TransportRequest) -> SharedFetch {
        let transport = Arc::clone(&self.transport);
        let cache = Arc::clone(&self.cache);
        let inflight = Arc::clone(&self.inflight);

        async move {
            let result = transport.execute(request).await;
            if let Ok(outcome) = &result {
                if outcome.success {
                    cache.put(&key, outcome.clone());
                }
            }
            inflight.remove(&key);
            result
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Transport stub that counts calls and answers after a short delay, so
    /// tests can overlap requests deterministically.
    struct MockTransport {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::from_millis(50),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn execute(&self, request: TransportRequest) -> Result<ApiOutcome, RetrieveError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(RetrieveError::Network("connection refused".into()));
            }
            Ok(ApiOutcome::ok(json!({
                "path": request.path,
                "call": call,
            })))
        }
    }

    fn client_over(transport: &Arc<MockTransport>) -> CachedClient {
        let as_transport: Arc<dyn HttpTransport> = Arc::clone(transport) as _;
        CachedClient::new(as_transport)
    }

    #[tokio::test]
    async fn concurrent_identical_gets_share_one_call() {
        let transport = Arc::new(MockTransport::new());
        let client = Arc::new(client_over(&transport));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client.get("products", None).await.expect("request")
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.expect("join"));
        }

        assert_eq!(transport.calls(), 1);
        for outcome in &outcomes {
            assert_eq!(outcome.data, outcomes[0].data);
        }
    }

    #[tokio::test]
    async fn second_get_is_served_from_cache() {
        let transport = Arc::new(MockTransport::new());
        let client = client_over(&transport);

        let first = client.get("products", None).await.expect("first");
        let second = client.get("products", None).await.expect("second");

        assert_eq!(transport.calls(), 1);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn non_get_always_reaches_network() {
        let transport = Arc::new(MockTransport::new());
        let client = client_over(&transport);

        for _ in 0..2 {
            client
                .request(
                    Method::POST,
                    "orders",
                    None,
                    Some(json!({"items": []})),
                    RequestOptions::default(),
                )
                .await
                .expect("post");
        }
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn cart_paths_bypass_the_cache() {
        let transport = Arc::new(MockTransport::new());
        let client = client_over(&transport);

        client.get("cart", None).await.expect("first");
        client.get("cart", None).await.expect("second");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn no_cache_option_bypasses_the_cache() {
        let transport = Arc::new(MockTransport::new());
        let client = client_over(&transport);

        client.get("products", None).await.expect("warm");
        client
            .request(
                Method::GET,
                "products",
                None,
                None,
                RequestOptions { no_cache: true },
            )
            .await
            .expect("bypass");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn successful_write_invalidates_matching_entries() {
        let transport = Arc::new(MockTransport::new());
        let client = client_over(&transport);

        client.get("products", None).await.expect("warm products");
        client.get("categories", None).await.expect("warm categories");

        client
            .request(
                Method::PUT,
                "products/42",
                None,
                Some(json!({"name": "Mug"})),
                RequestOptions::default(),
            )
            .await
            .expect("put");

        // Products entry gone, categories untouched.
        client.get("products", None).await.expect("refetch products");
        client.get("categories", None).await.expect("cached categories");
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn failures_are_not_cached_and_can_be_retried() {
        let transport = Arc::new(MockTransport::new());
        let client = client_over(&transport);

        transport.fail.store(true, Ordering::SeqCst);
        assert!(client.get("products", None).await.is_err());

        transport.fail.store(false, Ordering::SeqCst);
        let outcome = client.get("products", None).await.expect("retry");
        assert!(outcome.success);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn coalesced_failure_reaches_every_waiter() {
        let transport = Arc::new(MockTransport::new());
        transport.fail.store(true, Ordering::SeqCst);
        let client = Arc::new(client_over(&transport));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(
                async move { client.get("orders", None).await },
            ));
        }
        for handle in handles {
            assert!(handle.await.expect("join").is_err());
        }
        assert_eq!(transport.calls(), 1);
    }
}
