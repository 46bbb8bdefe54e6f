//! # Event Channel Module
//!
//! The persistent bidirectional channel to the storefront backend.
//!
//! ## Purpose:
//! One WebSocket connection per process carries every push event (new
//! orders, status changes, read receipts) and every outbound notification
//! action. This module owns that connection: establishing it, detecting
//! silent death, reconnecting with bounded attempts plus a slow fallback
//! loop, and fanning inbound events out to subscribers.
//!
//! ## Contained Modules:
//!
//! - **`channel`**: the [`ChannelManager`] connection lifecycle.
//! - **`events`**: the wire format and the event-name vocabulary.

/// Connection lifecycle management with automatic reconnection.
pub mod channel;
/// Wire format and event-name constants.
pub mod events;

#[cfg(test)]
pub(crate) mod testing;

// --- Public API Re-exports ---
pub use channel::{ChannelConfig, ChannelManager, ChannelStatus};
pub use events::ChannelEvent;
