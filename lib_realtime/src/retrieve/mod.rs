//! # Data Retrieval Module
//!
//! A centralized location for HTTP interaction with the storefront backend.
//!
//! ## Purpose:
//! The goal of the `retrieve` module is to offer a consistent and robust way
//! to call the backend REST API while keeping redundant traffic off the wire.
//! It encapsulates request building, retry mechanisms, response caching with
//! TTL and pattern-based invalidation, and coalescing of concurrent identical
//! reads, so consumers can focus on their own state handling.
//!
//! ## Contained Modules:
//!
//! - **`api_client`**: a generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff. Exposes the `HttpTransport` seam the caching layer and the
//!   tests plug into.
//! - **`cache`**: the TTL response cache and the in-flight request registry.
//! - **`client`**: `CachedClient`, the policy layer tying transport, cache
//!   and coalescing together. This is what application code talks to.

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod api_client;
/// TTL response cache and in-flight request registry.
pub mod cache;
/// The cached, coalescing client wrapping the transport.
pub mod client;

// --- Public API Re-exports ---
pub use api_client::{ApiClient, ApiOutcome, HttpTransport, RetrieveError, TransportRequest};
pub use cache::{InflightRegistry, ResponseCache};
pub use client::{CachedClient, RequestOptions};
