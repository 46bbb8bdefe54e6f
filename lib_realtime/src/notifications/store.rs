//! # Local Notification Persistence
//!
//! Per-role JSON files keeping the feed and the read receipts across
//! restarts: `{prefix}_notifications.json` holds the feed snapshot,
//! `{prefix}_read_ids.json` the ids the user has read locally. Storage
//! failures degrade gracefully: a corrupt or missing file reads as empty,
//! a failed write is logged and forgotten.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::model::{Notification, Role};

/// Maximum entries kept in a persisted snapshot.
pub const SNAPSHOT_CAP: usize = 50;

/// Persisted feed state.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub items: Vec<Notification>,
    pub unread: usize,
}

/// File-backed store rooted at a data directory.
pub struct NotificationStore {
    root: PathBuf,
}

impl NotificationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn snapshot_path(&self, role: Role) -> PathBuf {
        self.root.join(format!("{}_notifications.json", role.prefix()))
    }

    fn read_ids_path(&self, role: Role) -> PathBuf {
        self.root.join(format!("{}_read_ids.json", role.prefix()))
    }

    pub fn load_snapshot(&self, role: Role) -> Snapshot {
        self.load_json(&self.snapshot_path(role)).unwrap_or_default()
    }

    pub fn save_snapshot(&self, role: Role, snapshot: &Snapshot) {
        self.save_json(&self.snapshot_path(role), snapshot);
    }

    pub fn load_read_ids(&self, role: Role) -> Vec<String> {
        self.load_json(&self.read_ids_path(role)).unwrap_or_default()
    }

    pub fn save_read_ids(&self, role: Role, ids: &[String]) {
        self.save_json(&self.read_ids_path(role), &ids.to_vec());
    }

    /// Records one read id, skipping duplicates.
    pub fn add_read_id(&self, role: Role, id: &str) {
        let mut ids = self.load_read_ids(role);
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
            self.save_read_ids(role, &ids);
        }
    }

    pub fn add_read_ids(&self, role: Role, new_ids: &[String]) {
        let mut ids = self.load_read_ids(role);
        let mut changed = false;
        for id in new_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
                changed = true;
            }
        }
        if changed {
            self.save_read_ids(role, &ids);
        }
    }

    pub fn remove_read_id(&self, role: Role, id: &str) {
        let mut ids = self.load_read_ids(role);
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() != before {
            self.save_read_ids(role, &ids);
        }
    }

    /// Removes every file belonging to `role`.
    pub fn clear(&self, role: Role) {
        for path in [self.snapshot_path(role), self.read_ids_path(role)] {
            if path.exists() {
                if let Err(error) = std::fs::remove_file(&path) {
                    warn!(%error, path = %path.display(), "failed to remove notification file");
                }
            }
        }
    }

    fn load_json<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%error, path = %path.display(), "ignoring unreadable notification file");
                None
            }
        }
    }

    fn save_json<T: Serialize>(&self, path: &Path, value: &T) {
        if let Err(error) = std::fs::create_dir_all(&self.root) {
            warn!(%error, "failed to create notification data directory");
            return;
        }
        match serde_json::to_string(value) {
            Ok(text) => {
                if let Err(error) = std::fs::write(path, text) {
                    warn!(%error, path = %path.display(), "failed to write notification file");
                }
            }
            Err(error) => warn!(%error, "failed to serialize notification state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, NotificationStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = NotificationStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn snapshot_roundtrip_per_role() {
        let (_dir, store) = store();
        let snapshot = Snapshot {
            items: vec![Notification {
                title: "New order".to_string(),
                ..Notification::default()
            }],
            unread: 1,
        };
        store.save_snapshot(Role::Admin, &snapshot);

        let loaded = store.load_snapshot(Role::Admin);
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.unread, 1);

        // The customer file is independent.
        assert!(store.load_snapshot(Role::Customer).items.is_empty());
    }

    #[test]
    fn corrupt_files_read_as_empty() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("client_notifications.json"), "{nope")
            .expect("write garbage");
        std::fs::write(dir.path().join("client_read_ids.json"), "also nope")
            .expect("write garbage");

        assert!(store.load_snapshot(Role::Customer).items.is_empty());
        assert!(store.load_read_ids(Role::Customer).is_empty());
    }

    #[test]
    fn read_ids_deduplicate() {
        let (_dir, store) = store();
        store.add_read_id(Role::Customer, "n-1");
        store.add_read_id(Role::Customer, "n-1");
        store.add_read_id(Role::Customer, "n-2");
        assert_eq!(store.load_read_ids(Role::Customer), vec!["n-1", "n-2"]);

        store.remove_read_id(Role::Customer, "n-1");
        assert_eq!(store.load_read_ids(Role::Customer), vec!["n-2"]);
    }

    #[test]
    fn clear_removes_role_files_only() {
        let (_dir, store) = store();
        store.save_snapshot(Role::Admin, &Snapshot::default());
        store.save_snapshot(Role::Customer, &Snapshot::default());
        store.add_read_id(Role::Admin, "n-1");

        store.clear(Role::Admin);
        assert!(store.load_read_ids(Role::Admin).is_empty());
        // Customer snapshot untouched (file still present and readable).
        assert_eq!(store.load_snapshot(Role::Customer).unread, 0);
    }
}
