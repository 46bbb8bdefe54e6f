//! # Storefront Real-Time Client Core
//!
//! Client-side infrastructure for the storefront application: everything the
//! customer and admin front ends need to stay synchronized with the backend
//! without owning any business logic themselves.
//!
//! ## Contained Modules (feature-gated, see Cargo.toml):
//!
//! - **`connections`**: the persistent bidirectional event channel. One
//!   connection per process, automatic reconnection with a belt-and-suspenders
//!   fallback retry loop, authentication handshake, raw event emit/receive.
//! - **`retrieve`**: a cached HTTP client built on `reqwest` middleware.
//!   Serves repeated GETs from a TTL cache, coalesces concurrent identical
//!   requests into a single network call, and invalidates cached entries
//!   after mutating calls.
//! - **`notifications`**: the notification feed engine. Merges REST fetches,
//!   push events and optimistic local actions into one deduplicated, ordered,
//!   locally-persisted feed per session role.
//! - **`configs`**: environment-driven runtime configuration.
//! - **`loggers`**: tracing subscriber setup.
//! - **`utils`**: timestamp and identifier helpers shared by the above.

#![forbid(unsafe_code)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "notifications")]
pub mod notifications;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "utils")]
pub mod utils;

// --- Public API Re-exports ---
// Make the primary types directly accessible under the crate root.
#[cfg(feature = "configs")]
pub use configs::RealtimeConfig;
#[cfg(feature = "connections")]
pub use connections::{ChannelConfig, ChannelEvent, ChannelManager, ChannelStatus};
#[cfg(feature = "notifications")]
pub use notifications::{NotificationEngine, Role};
#[cfg(feature = "retrieve")]
pub use retrieve::{ApiClient, CachedClient};
