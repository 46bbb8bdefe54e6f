//! # Notification Model
//!
//! The notification record and the tolerant decoding rules for the many
//! shapes the backend produces. Push payloads and REST listings disagree on
//! field names and timestamp formats; everything is normalized here so the
//! rest of the engine deals in one type.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::utils::local_id;

/// Session role. Decides which event vocabulary, REST paths and local files
/// a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Prefix of the per-role persistence files.
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Customer => "client",
        }
    }
}

/// One feed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    /// Backend id when assigned, locally-generated otherwise.
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "orderCode", alias = "order_code")]
    pub order_code: Option<String>,
    pub status: Option<String>,
    #[serde(
        rename = "createdAt",
        alias = "timestamp",
        deserialize_with = "de_timestamp"
    )]
    pub created_at: DateTime<Utc>,
    pub read: bool,
    /// Number of grouped entries when this record summarizes several.
    pub count: Option<u64>,
    /// Raw member payloads of a grouped record.
    pub items: Vec<Value>,
}

impl Default for Notification {
    fn default() -> Self {
        Self {
            id: local_id(),
            kind: String::new(),
            title: String::new(),
            description: String::new(),
            order_code: None,
            status: None,
            created_at: Utc::now(),
            read: false,
            count: None,
            items: Vec::new(),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.is_empty() => s,
        Value::Number(n) => n.to_string(),
        _ => local_id(),
    })
}

fn de_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(parse_timestamp(&value))
}

/// Decodes the timestamp shapes the backend emits: RFC 3339 strings, Unix
/// seconds and Unix milliseconds. Anything unreadable becomes "now" rather
/// than an error.
pub fn parse_timestamp(value: &Value) -> DateTime<Utc> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
            match raw {
                Some(v) => {
                    // Values past ~year 2286 in seconds are really millis.
                    let millis = if v > 10_000_000_000 { v } else { v * 1000 };
                    Utc.timestamp_millis_opt(millis)
                        .single()
                        .unwrap_or_else(Utc::now)
                }
                None => Utc::now(),
            }
        }
        _ => Utc::now(),
    }
}

/// Human-readable label for an order status code. Unknown codes pass
/// through unchanged.
pub fn status_text(code: &str) -> String {
    match code {
        "pending" => "Pending confirmation".to_string(),
        "confirmed" => "Confirmed".to_string(),
        "processing" => "Being prepared".to_string(),
        "shipping" => "Out for delivery".to_string(),
        "delivered" => "Delivered".to_string(),
        "completed" => "Completed".to_string(),
        "cancelled" => "Cancelled".to_string(),
        other => other.to_string(),
    }
}

/// Returns the entries newest-first.
pub fn sorted_desc(items: &[Notification]) -> Vec<Notification> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_push_payload_shape() {
        let n: Notification = serde_json::from_value(json!({
            "id": 42,
            "type": "new-order",
            "title": "New order",
            "description": "Order A-17 placed",
            "orderCode": "A-17",
            "timestamp": 1700000000,
        }))
        .expect("decode");
        assert_eq!(n.id, "42");
        assert_eq!(n.order_code.as_deref(), Some("A-17"));
        assert_eq!(n.created_at.timestamp(), 1_700_000_000);
        assert!(!n.read);
    }

    #[test]
    fn decodes_listing_shape_with_rfc3339() {
        let n: Notification = serde_json::from_value(json!({
            "id": "srv-9",
            "type": "order-status-update",
            "title": "Order update",
            "description": "Out for delivery",
            "order_code": "B-3",
            "status": "shipping",
            "createdAt": "2026-08-20T10:15:00Z",
            "read": true,
        }))
        .expect("decode");
        assert_eq!(n.id, "srv-9");
        assert!(n.read);
        assert_eq!(n.created_at.to_rfc3339(), "2026-08-20T10:15:00+00:00");
    }

    #[test]
    fn millisecond_timestamps_are_recognized() {
        let n: Notification = serde_json::from_value(json!({
            "timestamp": 1700000000000_i64,
        }))
        .expect("decode");
        assert_eq!(n.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn missing_id_gets_a_local_one() {
        let a: Notification = serde_json::from_value(json!({"title": "x"})).expect("decode");
        let b: Notification = serde_json::from_value(json!({"title": "x"})).expect("decode");
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn unknown_status_codes_pass_through() {
        assert_eq!(status_text("shipping"), "Out for delivery");
        assert_eq!(status_text("some-new-state"), "some-new-state");
    }

    #[test]
    fn sorted_desc_orders_newest_first() {
        let mk = |secs: i64| Notification {
            created_at: Utc.timestamp_opt(secs, 0).single().expect("ts"),
            ..Notification::default()
        };
        let sorted = sorted_desc(&[mk(100), mk(300), mk(200)]);
        let stamps: Vec<i64> = sorted.iter().map(|n| n.created_at.timestamp()).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
    }
}
