//! # Channel Events
//!
//! The wire format of the event channel and the full vocabulary of event
//! names the backend and the clients exchange. Frames are JSON text of the
//! shape `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Client -> server.
pub const EVENT_CHECK_CONNECTION: &str = "check-connection";
pub const EVENT_ADMIN_LOGIN: &str = "admin-login";
pub const EVENT_CUSTOMER_LOGIN: &str = "customer-login";
pub const EVENT_MARK_READ: &str = "mark-notification-read";
pub const EVENT_MARK_ALL_READ: &str = "mark-all-notifications-read";

// Synthetic, published locally on connection lifecycle transitions. The
// backend also answers the login handshake with a `connect` carrying the
// session identity.
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_DISCONNECT: &str = "disconnect";

// Server -> client pushes.
pub const EVENT_GROUPED: &str = "grouped-notification";
pub const EVENT_NEW_ORDER: &str = "new-order";
pub const EVENT_ADMIN_NOTIFICATION: &str = "admin-notification";
pub const EVENT_ORDER_STATUS: &str = "order-status-update";
pub const EVENT_ADMIN_READ: &str = "admin-notification-read";
pub const EVENT_CUSTOMER_READ: &str = "notification-marked-read";
pub const EVENT_ADMIN_READ_ALL: &str = "admin-all-notifications-read";
pub const EVENT_CUSTOMER_READ_ALL: &str = "all-notifications-marked-read";
pub const EVENT_ADMIN_DELETED: &str = "admin-notification-deleted";
pub const EVENT_CUSTOMER_DELETED: &str = "notification-deleted";

/// One event frame, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    #[serde(rename = "event")]
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl ChannelEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Parses a raw text frame. Malformed frames yield `None`; the caller
    /// logs and drops them.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// Serializes the event to its wire form.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
