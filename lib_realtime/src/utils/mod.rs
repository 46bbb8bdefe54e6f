//! # Shared Helpers
//!
//! Small utilities used across modules: wall-clock timestamps in the Unix
//! millisecond format the backend speaks, and locally-generated identifiers
//! for records created before the backend has assigned one.

use chrono::Utc;

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generates a locally-unique identifier (UUID v4).
pub fn local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_unique() {
        assert_ne!(local_id(), local_id());
    }

    #[test]
    fn now_millis_is_recent() {
        // Anything after 2020 counts as a sane clock.
        assert!(now_millis() > 1_577_836_800_000);
    }
}
