//! # Duplicate Suppression
//!
//! Two complementary guards against double-processing push events:
//!
//! - [`ProcessedIds`]: a bounded set of event ids already handled, for exact
//!   redeliveries. Capped so a long-lived session cannot grow it forever;
//!   eviction drops the oldest entries in bulk.
//! - [`is_recent_duplicate`]: a similarity check against the newest feed
//!   entries, for the backend habit of announcing one order change through
//!   two differently-shaped events within moments of each other.

use std::collections::{HashSet, VecDeque};

use super::model::Notification;

/// Maximum ids remembered before eviction kicks in.
pub const PROCESSED_IDS_CAP: usize = 500;
/// How many oldest ids one eviction removes.
pub const PROCESSED_IDS_EVICT: usize = 100;
/// Two notifications about the same order within this window are one event.
pub const DEDUP_WINDOW_MS: i64 = 5_000;
/// How many of the newest entries the similarity check scans.
pub const DEDUP_SCAN_DEPTH: usize = 5;

/// Bounded insertion-ordered id set.
#[derive(Debug, Default)]
pub struct ProcessedIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ProcessedIds {
    /// Records `id`. Returns false when it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= PROCESSED_IDS_CAP {
            for _ in 0..PROCESSED_IDS_EVICT {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// True when `candidate` matches one of the newest feed entries in kind,
/// order code and status within the dedup window. Entries without an order
/// code never match; they carry nothing to correlate on.
pub fn is_recent_duplicate(items: &[Notification], candidate: &Notification) -> bool {
    if candidate.order_code.is_none() {
        return false;
    }
    let mut newest: Vec<&Notification> = items.iter().collect();
    newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    newest.into_iter().take(DEDUP_SCAN_DEPTH).any(|existing| {
        existing.kind == candidate.kind
            && existing.order_code == candidate.order_code
            && existing.status == candidate.status
            && (candidate.created_at - existing.created_at)
                .num_milliseconds()
                .abs()
                < DEDUP_WINDOW_MS
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut ids = ProcessedIds::default();
        assert!(ids.insert("a"));
        assert!(!ids.insert("a"));
        assert!(ids.insert("b"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn eviction_keeps_the_set_bounded_and_forgets_oldest() {
        let mut ids = ProcessedIds::default();
        for i in 0..=PROCESSED_IDS_CAP {
            assert!(ids.insert(&format!("id-{i}")));
        }
        assert!(ids.len() <= PROCESSED_IDS_CAP);

        // The oldest batch was dropped and may be processed again.
        assert!(!ids.contains("id-0"));
        assert!(!ids.contains("id-99"));
        assert!(ids.contains("id-100"));
        assert!(ids.contains(&format!("id-{PROCESSED_IDS_CAP}")));
    }

    fn order_event(code: &str, status: &str, at: chrono::DateTime<Utc>) -> Notification {
        Notification {
            kind: "order-status-update".to_string(),
            order_code: Some(code.to_string()),
            status: Some(status.to_string()),
            created_at: at,
            ..Notification::default()
        }
    }

    #[test]
    fn near_simultaneous_same_order_is_a_duplicate() {
        let now = Utc::now();
        let feed = vec![order_event("A-17", "shipping", now)];
        let candidate = order_event("A-17", "shipping", now + Duration::milliseconds(1_000));
        assert!(is_recent_duplicate(&feed, &candidate));
    }

    #[test]
    fn outside_the_window_is_not_a_duplicate() {
        let now = Utc::now();
        let feed = vec![order_event("A-17", "shipping", now)];
        let candidate = order_event("A-17", "shipping", now + Duration::milliseconds(6_000));
        assert!(!is_recent_duplicate(&feed, &candidate));
    }

    #[test]
    fn different_status_or_order_is_not_a_duplicate() {
        let now = Utc::now();
        let feed = vec![order_event("A-17", "shipping", now)];
        assert!(!is_recent_duplicate(&feed, &order_event("A-17", "delivered", now)));
        assert!(!is_recent_duplicate(&feed, &order_event("B-3", "shipping", now)));
    }

    #[test]
    fn entries_without_an_order_code_always_insert() {
        let now = Utc::now();
        let plain = Notification {
            kind: "announcement".to_string(),
            created_at: now,
            ..Notification::default()
        };
        let feed = vec![plain.clone()];
        assert!(!is_recent_duplicate(&feed, &plain));
    }

    #[test]
    fn only_the_newest_entries_are_scanned() {
        let now = Utc::now();
        let mut feed = Vec::new();
        // Older matching entry buried beyond the scan depth by newer ones.
        feed.push(order_event("A-17", "shipping", now));
        for i in 0..DEDUP_SCAN_DEPTH {
            feed.push(order_event(
                &format!("X-{i}"),
                "pending",
                now + Duration::milliseconds(10 * (i as i64 + 1)),
            ));
        }
        let candidate = order_event("A-17", "shipping", now + Duration::milliseconds(1_000));
        assert!(!is_recent_duplicate(&feed, &candidate));
    }
}
