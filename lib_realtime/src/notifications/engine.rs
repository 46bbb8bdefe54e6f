//! # Notification Engine
//!
//! One coherent notification feed per session, merged from three sources:
//! REST listings (through the cached client), push events (through the
//! channel manager) and optimistic local actions.
//!
//! ## Key Design Points:
//! - **Optimistic writes**: user actions mutate local state first, then fire
//!   the REST call. A failed single-item call keeps the optimistic state
//!   (drift resolves at the next fetch); failed bulk or delete calls force a
//!   re-fetch, since they carry more drift.
//! - **Duplicate suppression**: a bounded processed-id set catches exact
//!   push redeliveries; a similarity window catches the same order change
//!   announced through two differently-shaped events.
//! - **No feedback loops**: remote read/delete events mutate local state
//!   without re-emitting the broadcast that caused them.
//! - **State discipline**: the state mutex is only ever held inside
//!   synchronous blocks; persistence and network calls happen after it is
//!   released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::connections::events::{
    EVENT_ADMIN_DELETED, EVENT_ADMIN_NOTIFICATION, EVENT_ADMIN_READ, EVENT_ADMIN_READ_ALL,
    EVENT_CUSTOMER_DELETED, EVENT_CUSTOMER_READ, EVENT_CUSTOMER_READ_ALL, EVENT_GROUPED,
    EVENT_MARK_ALL_READ, EVENT_MARK_READ, EVENT_NEW_ORDER, EVENT_ORDER_STATUS,
};
use crate::connections::{ChannelEvent, ChannelManager};
use crate::retrieve::{CachedClient, RequestOptions};
use crate::utils::local_id;

use super::dedup::{is_recent_duplicate, ProcessedIds};
use super::model::{parse_timestamp, sorted_desc, status_text, Notification, Role};
use super::store::{NotificationStore, Snapshot, SNAPSHOT_CAP};

/// Delay collapsing bursts of push events into one listing re-fetch.
const REFETCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Presentation hooks: sound cue and ephemeral toast. The engine calls
/// these; what they do is up to the embedding application.
pub trait NotificationSink: Send + Sync {
    fn play_cue(&self) {}
    fn show_toast(&self, _toast: &Toast) {}
}

/// Ephemeral toast content. `order_code` enables a click-through to the
/// order detail view when present.
#[derive(Debug, Clone)]
pub struct Toast {
    pub title: String,
    pub body: String,
    pub order_code: Option<String>,
}

struct EngineState {
    items: Vec<Notification>,
    unread: usize,
    processed: ProcessedIds,
}

/// The per-session notification feed.
pub struct NotificationEngine {
    role: Role,
    client: Arc<CachedClient>,
    channel: Arc<ChannelManager>,
    store: NotificationStore,
    state: Mutex<EngineState>,
    user_id: Mutex<Option<String>>,
    sink: Mutex<Option<Arc<dyn NotificationSink>>>,
    /// Bumped on every refetch request; a debounce task only fetches if its
    /// generation is still current when the delay elapses.
    refetch_generation: AtomicU64,
    /// Back-reference for handing clones to spawned tasks.
    weak: Weak<Self>,
}

impl NotificationEngine {
    pub fn new(
        role: Role,
        client: Arc<CachedClient>,
        channel: Arc<ChannelManager>,
        store: NotificationStore,
    ) -> Arc<Self> {
        let snapshot = store.load_snapshot(role);
        let unread = snapshot.items.iter().filter(|n| !n.read).count();
        Arc::new_cyclic(|weak| Self {
            role,
            client,
            channel,
            store,
            state: Mutex::new(EngineState {
                items: snapshot.items,
                unread,
                processed: ProcessedIds::default(),
            }),
            user_id: Mutex::new(None),
            sink: Mutex::new(None),
            refetch_generation: AtomicU64::new(0),
            weak: weak.clone(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_user(&self, user_id: impl Into<String>) {
        *self.user_id.lock().expect("engine user lock poisoned") = Some(user_id.into());
    }

    pub fn set_sink(&self, sink: Arc<dyn NotificationSink>) {
        *self.sink.lock().expect("engine sink lock poisoned") = Some(sink);
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().expect("engine state lock poisoned").unread
    }

    /// Current feed, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        let state = self.state.lock().expect("engine state lock poisoned");
        sorted_desc(&state.items)
    }

    /// Starts consuming push events. Call once after `channel.connect()`.
    pub fn spawn(&self) {
        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        let mut events = self.channel.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => engine.handle_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "notification engine lagged behind the event stream");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Replaces the feed from the role-specific REST listing, keeping local
    /// read marks authoritative until the server catches up. Silent no-op
    /// without a signed-in user.
    pub async fn fetch_notifications(&self) {
        if self.user_id.lock().expect("engine user lock poisoned").is_none() {
            debug!("skipping notification fetch without a user");
            return;
        }

        // Always hit the network: this listing is the reconciliation point
        // for optimistic drift, a cached copy defeats it.
        let path = self.listing_path();
        let options = RequestOptions { no_cache: true };
        let outcome = match self
            .client
            .request(Method::GET, path, None, None, options)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%error, "notification fetch failed");
                return;
            }
        };
        if !outcome.success {
            warn!(status = outcome.status, "notification listing rejected");
            return;
        }

        let mut items = normalize_listing(outcome.data);
        let read_ids = self.store.load_read_ids(self.role);
        for item in &mut items {
            if read_ids.iter().any(|id| *id == item.id) {
                item.read = true;
            }
        }

        {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            state.items = items;
            cap_items(&mut state.items);
            state.unread = recount(&state.items);
        }
        self.persist();
    }

    /// Marks one entry read. Optimistic; a REST failure keeps the local
    /// state. Idempotent for already-read entries.
    pub async fn mark_as_read(&self, id: &str) {
        let changed = {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            match state.items.iter_mut().find(|n| n.id == id) {
                Some(item) if !item.read => {
                    item.read = true;
                    state.unread = state.unread.saturating_sub(1);
                    true
                }
                Some(_) => false,
                None => false,
            }
        };
        if changed {
            self.persist();
        }
        self.store.add_read_id(self.role, id);
        self.broadcast_read(id);

        let (method, path, body) = self.mark_read_call(&[id.to_string()]);
        if let Err(error) = self
            .client
            .request(method, &path, None, Some(body), RequestOptions::default())
            .await
        {
            // Deliberately no rollback; the next fetch reconciles.
            warn!(%error, id, "mark-as-read call failed, keeping optimistic state");
        }
    }

    /// Marks everything read. On REST failure the feed is re-fetched: bulk
    /// drift is not left standing the way single-item drift is.
    pub async fn mark_all_as_read(&self) {
        let (unread_ids, all_ids) = {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            let unread_ids: Vec<String> = state
                .items
                .iter()
                .filter(|n| !n.read)
                .map(|n| n.id.clone())
                .collect();
            for item in &mut state.items {
                item.read = true;
            }
            state.unread = 0;
            let all_ids: Vec<String> = state.items.iter().map(|n| n.id.clone()).collect();
            (unread_ids, all_ids)
        };
        self.persist();
        self.store.add_read_ids(self.role, &all_ids);

        if let Some(user) = self.current_user() {
            self.channel.emit(
                EVENT_MARK_ALL_READ,
                json!({"userId": user, "isAdmin": self.role.is_admin()}),
            );
        }

        let (method, path, body) = if self.role.is_admin() {
            (
                Method::PUT,
                "admin/notifications/read".to_string(),
                json!({"ids": unread_ids}),
            )
        } else {
            (
                Method::POST,
                "client/notifications/read-all".to_string(),
                Value::Null,
            )
        };
        let body = if body.is_null() { None } else { Some(body) };
        if let Err(error) = self
            .client
            .request(method, &path, None, body, RequestOptions::default())
            .await
        {
            warn!(%error, "mark-all-as-read call failed, re-fetching");
            self.fetch_notifications().await;
        }
    }

    /// Removes one entry. Optimistic; a REST failure re-fetches.
    pub async fn delete_notification(&self, id: &str) {
        {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            let before = state.items.len();
            state.items.retain(|n| n.id != id);
            if state.items.len() == before {
                return;
            }
            state.unread = recount(&state.items);
        }
        self.persist();
        self.store.remove_read_id(self.role, id);

        let path = format!("{}/notifications/{}", self.role.prefix(), id);
        if let Err(error) = self
            .client
            .request(Method::DELETE, &path, None, None, RequestOptions::default())
            .await
        {
            warn!(%error, id, "delete call failed, re-fetching");
            self.fetch_notifications().await;
        }
    }

    /// Empties the feed and its persisted files. Local only; the backend
    /// has no clear-all.
    pub fn clear_all_notifications(&self) {
        {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            state.items.clear();
            state.unread = 0;
        }
        self.store.clear(self.role);
    }

    async fn handle_event(&self, event: ChannelEvent) {
        match event.name.as_str() {
            EVENT_GROUPED => self.on_grouped(&event.data),
            EVENT_ORDER_STATUS if !self.role.is_admin() => self.on_order_status(&event.data),
            EVENT_NEW_ORDER | EVENT_ADMIN_NOTIFICATION if self.role.is_admin() => {
                self.on_admin_order(&event.data);
                self.schedule_refetch();
            }
            EVENT_ADMIN_READ if self.role.is_admin() => self.on_remote_read(&event.data),
            EVENT_CUSTOMER_READ if !self.role.is_admin() => self.on_remote_read(&event.data),
            EVENT_ADMIN_READ_ALL if self.role.is_admin() => self.on_remote_read_all(),
            EVENT_CUSTOMER_READ_ALL if !self.role.is_admin() => self.on_remote_read_all(),
            EVENT_ADMIN_DELETED if self.role.is_admin() => self.on_remote_delete(&event.data),
            EVENT_CUSTOMER_DELETED if !self.role.is_admin() => self.on_remote_delete(&event.data),
            _ => {}
        }
    }

    fn on_grouped(&self, data: &Value) {
        let event_id = event_id(data);
        if !self.begin_processing(&event_id) {
            return;
        }
        let notification = Notification {
            id: event_id,
            kind: opt_text(data, "originalType").unwrap_or_else(|| "grouped".to_string()),
            title: text_field(data, "title"),
            description: text_field(data, "description"),
            order_code: None,
            status: None,
            created_at: parse_timestamp(data.get("timestamp").unwrap_or(&Value::Null)),
            read: false,
            count: data.get("count").and_then(Value::as_u64),
            items: data
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        };
        if self.insert_notification(notification.clone()) {
            self.present(&notification);
        }
    }

    fn on_order_status(&self, data: &Value) {
        let event_id = event_id(data);
        if !self.begin_processing(&event_id) {
            return;
        }
        let status = opt_text(data, "status");
        let description = status
            .as_deref()
            .map(status_text)
            .unwrap_or_else(|| "Your order was updated".to_string());
        let notification = Notification {
            id: event_id,
            kind: "order-status-update".to_string(),
            title: "Order update".to_string(),
            description,
            order_code: opt_text(data, "orderCode"),
            status,
            created_at: parse_timestamp(data.get("timestamp").unwrap_or(&Value::Null)),
            read: false,
            count: None,
            items: Vec::new(),
        };
        if self.insert_notification(notification.clone()) {
            self.present(&notification);
        }
    }

    fn on_admin_order(&self, data: &Value) {
        let event_id = event_id(data);
        if !self.begin_processing(&event_id) {
            return;
        }
        let kind = opt_text(data, "type").unwrap_or_else(|| "new-order".to_string());
        let status = opt_text(data, "status");
        let cancelled = kind == "cancelled-by-user" || status.as_deref() == Some("cancelled");
        let order_code = opt_text(data, "orderCode");
        let title = if cancelled { "Order cancelled" } else { "New order" };
        let description = match &order_code {
            Some(code) => format!("{title}: {code}"),
            None => title.to_string(),
        };
        let notification = Notification {
            id: event_id,
            kind,
            title: title.to_string(),
            description,
            order_code,
            status,
            created_at: parse_timestamp(data.get("timestamp").unwrap_or(&Value::Null)),
            read: false,
            count: None,
            items: Vec::new(),
        };
        if self.insert_notification(notification.clone()) {
            self.present(&notification);
        }
    }

    /// Mirrors a read performed by another session. Never re-broadcasts.
    fn on_remote_read(&self, data: &Value) {
        let Some(id) = opt_ident(data, "id").or_else(|| opt_ident(data, "notificationId")) else {
            return;
        };
        let changed = {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            match state.items.iter_mut().find(|n| n.id == id) {
                Some(item) if !item.read => {
                    item.read = true;
                    state.unread = state.unread.saturating_sub(1);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.persist();
            self.store.add_read_id(self.role, &id);
        }
    }

    fn on_remote_read_all(&self) {
        let all_ids = {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            for item in &mut state.items {
                item.read = true;
            }
            state.unread = 0;
            state.items.iter().map(|n| n.id.clone()).collect::<Vec<_>>()
        };
        self.persist();
        self.store.add_read_ids(self.role, &all_ids);
    }

    fn on_remote_delete(&self, data: &Value) {
        let Some(id) = opt_ident(data, "id").or_else(|| opt_ident(data, "notificationId")) else {
            return;
        };
        let changed = {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            let before = state.items.len();
            state.items.retain(|n| n.id != id);
            if state.items.len() == before {
                false
            } else {
                state.unread = recount(&state.items);
                true
            }
        };
        if changed {
            self.persist();
            self.store.remove_read_id(self.role, &id);
        }
    }

    /// Registers a push-event id. False means the event was already handled.
    fn begin_processing(&self, event_id: &str) -> bool {
        let mut state = self.state.lock().expect("engine state lock poisoned");
        state.processed.insert(event_id)
    }

    /// Inserts unless the similarity window says this is a re-announcement.
    fn insert_notification(&self, notification: Notification) -> bool {
        let inserted = {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            if is_recent_duplicate(&state.items, &notification) {
                debug!(id = %notification.id, "suppressing near-duplicate notification");
                false
            } else {
                state.items.push(notification);
                cap_items(&mut state.items);
                state.unread = recount(&state.items);
                true
            }
        };
        if inserted {
            self.persist();
        }
        inserted
    }

    fn present(&self, notification: &Notification) {
        let sink = self.sink.lock().expect("engine sink lock poisoned").clone();
        if let Some(sink) = sink {
            sink.play_cue();
            sink.show_toast(&Toast {
                title: notification.title.clone(),
                body: notification.description.clone(),
                order_code: notification.order_code.clone(),
            });
        }
    }

    fn broadcast_read(&self, id: &str) {
        if let Some(user) = self.current_user() {
            self.channel.emit(
                EVENT_MARK_READ,
                json!({
                    "notificationId": id,
                    "userId": user,
                    "isAdmin": self.role.is_admin(),
                }),
            );
        }
    }

    /// Schedules a debounced listing re-fetch; bursts collapse into one.
    fn schedule_refetch(&self) {
        let generation = self.refetch_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(REFETCH_DEBOUNCE).await;
            if engine.refetch_generation.load(Ordering::SeqCst) == generation {
                info!("debounced notification re-fetch");
                engine.fetch_notifications().await;
            }
        });
    }

    fn persist(&self) {
        let snapshot = {
            let state = self.state.lock().expect("engine state lock poisoned");
            Snapshot {
                items: state.items.clone(),
                unread: state.unread,
            }
        };
        self.store.save_snapshot(self.role, &snapshot);
    }

    fn current_user(&self) -> Option<String> {
        self.user_id.lock().expect("engine user lock poisoned").clone()
    }

    fn listing_path(&self) -> &'static str {
        if self.role.is_admin() {
            "admin/notifications"
        } else {
            "client/notifications"
        }
    }

    fn mark_read_call(&self, ids: &[String]) -> (Method, String, Value) {
        if self.role.is_admin() {
            (
                Method::PUT,
                "admin/notifications/read".to_string(),
                json!({"ids": ids}),
            )
        } else {
            (
                Method::POST,
                "client/notifications/read".to_string(),
                json!({"ids": ids}),
            )
        }
    }
}

fn recount(items: &[Notification]) -> usize {
    items.iter().filter(|n| !n.read).count()
}

/// Enforces the snapshot cap by dropping oldest entries first.
fn cap_items(items: &mut Vec<Notification>) {
    while items.len() > SNAPSHOT_CAP {
        let oldest = items
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| n.created_at)
            .map(|(index, _)| index);
        match oldest {
            Some(index) => {
                items.remove(index);
            }
            None => break,
        }
    }
}

/// Unwraps the listing shapes the backend produces: a bare array, an array
/// under `data`, or an array under `data.data`. Malformed entries are
/// skipped, not fatal.
fn normalize_listing(payload: Value) -> Vec<Notification> {
    let array = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(mut inner)) => match inner.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    array
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Notification>(raw) {
            Ok(notification) => Some(notification),
            Err(error) => {
                debug!(%error, "skipping malformed notification entry");
                None
            }
        })
        .collect()
}

/// Push-event identifier: `notificationId` preferred, then `id`, with a
/// local fallback so guard bookkeeping always has something to key on.
fn event_id(data: &Value) -> String {
    ["notificationId", "id"]
        .into_iter()
        .find_map(|key| opt_ident(data, key))
        .unwrap_or_else(local_id)
}

/// Id fields arrive as strings or numbers depending on the backend route.
fn opt_ident(data: &Value, key: &str) -> Option<String> {
    match data.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(data: &Value, key: &str) -> String {
    opt_text(data, key).unwrap_or_default()
}

fn opt_text(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}
