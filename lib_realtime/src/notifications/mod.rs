//! # Notifications Module
//!
//! The notification feed: one deduplicated, ordered, locally-persisted list
//! per session role, synchronized across REST fetches, channel push events
//! and optimistic local actions.
//!
//! ## Contained Modules:
//!
//! - **`model`**: the notification record, tolerant payload decoding,
//!   status-code labels and feed ordering.
//! - **`store`**: per-role JSON persistence for snapshots and read ids.
//! - **`dedup`**: the bounded processed-id set and the similarity window.
//! - **`engine`**: [`NotificationEngine`], the component tying it together.

/// Bounded processed-id tracking and near-duplicate suppression.
pub mod dedup;
/// The feed engine.
pub mod engine;
/// Record types and payload normalization.
pub mod model;
/// File-backed persistence.
pub mod store;

// --- Public API Re-exports ---
pub use engine::{NotificationEngine, NotificationSink, Toast};
pub use model::{status_text, Notification, Role};
pub use store::{NotificationStore, Snapshot};
