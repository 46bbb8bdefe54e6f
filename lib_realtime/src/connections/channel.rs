//! # Channel Manager
//!
//! Owns the single WebSocket connection to the backend event server.
//!
//! ## Key Design Points:
//! - **One connection per process**: `connect` is idempotent; the first call
//!   spawns the connection task, later calls are no-ops.
//! - **Bounded reconnect plus fallback**: a lost connection triggers up to
//!   `max_reconnect_attempts` immediate attempts. If those are exhausted, a
//!   slow fallback loop keeps nudging a retry every
//!   `fallback_retry_interval` until the link is back, and any
//!   `authenticate` or `check_connection` call while disconnected nudges it
//!   early.
//! - **Forced reconnection**: `reconnect` closes the current link cleanly
//!   and re-establishes after a short forced delay, used when the client
//!   suspects a half-dead connection.
//! - **Fan-out**: inbound events are published on a broadcast channel; any
//!   number of subscribers each get every event.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::utils::{local_id, now_millis};

use super::events::{ChannelEvent, EVENT_ADMIN_LOGIN, EVENT_CHECK_CONNECTION, EVENT_CONNECT, EVENT_CUSTOMER_LOGIN, EVENT_DISCONNECT};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Tunables for the connection lifecycle.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint of the event server.
    pub endpoint: String,
    /// Per-attempt handshake timeout.
    pub connect_timeout: Duration,
    /// Delay between immediate reconnect attempts.
    pub reconnect_delay: Duration,
    /// Immediate attempts before falling back to the slow retry loop.
    pub max_reconnect_attempts: u32,
    /// Interval of the slow fallback retry loop.
    pub fallback_retry_interval: Duration,
    /// Delay before re-establishing after a forced `reconnect`.
    pub forced_reconnect_delay: Duration,
    /// Log every inbound event at debug level.
    pub diagnostics: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::configs::DEFAULT_CHANNEL_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_attempts: 5,
            fallback_retry_interval: Duration::from_secs(10),
            forced_reconnect_delay: Duration::from_millis(500),
            diagnostics: false,
        }
    }
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

/// The process-wide event channel.
pub struct ChannelManager {
    config: ChannelConfig,
    status: RwLock<ChannelStatus>,
    started: AtomicBool,
    /// Unix millis of the last inbound frame, 0 before the first one.
    last_event_ms: AtomicI64,
    /// Session identity adopted from the server handshake, or a local
    /// fallback id.
    identity: Mutex<Option<String>>,
    /// Sender half of the outbound frame queue while a link is up.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    events: broadcast::Sender<ChannelEvent>,
    /// Wakes the run loop out of its idle wait for another attempt round.
    retry_nudge: Notify,
    /// Tears down the current link and re-establishes.
    force_reconnect: Notify,
    fallback: Mutex<Option<CancellationToken>>,
    /// Back-reference for handing clones to spawned tasks.
    weak: Weak<Self>,
}

impl ChannelManager {
    pub fn new(config: ChannelConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new_cyclic(|weak| Self {
            config,
            status: RwLock::new(ChannelStatus::Disconnected),
            started: AtomicBool::new(false),
            last_event_ms: AtomicI64::new(0),
            identity: Mutex::new(None),
            outbound: Mutex::new(None),
            events,
            retry_nudge: Notify::new(),
            force_reconnect: Notify::new(),
            fallback: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    /// Spawns the connection task. Idempotent.
    pub fn connect(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(manager) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move { manager.run().await });
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.read().expect("channel status lock poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    /// Unix millis of the last inbound frame, or `None` before any traffic.
    pub fn last_event_millis(&self) -> Option<i64> {
        match self.last_event_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn identity(&self) -> Option<String> {
        self.identity
            .lock()
            .expect("channel identity lock poisoned")
            .clone()
    }

    /// Subscribes to the inbound event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Queues an event frame for sending. Returns false when no link is up;
    /// the frame is dropped, not queued for later.
    pub fn emit(&self, name: &str, data: Value) -> bool {
        let frame = ChannelEvent::new(name, data).to_frame();
        let outbound = self.outbound.lock().expect("channel outbound lock poisoned");
        match outbound.as_ref() {
            Some(sender) => sender.send(frame).is_ok(),
            None => {
                debug!(event = %name, "dropping emit while disconnected");
                false
            }
        }
    }

    /// Sends the login handshake for `user_id`. While disconnected this
    /// nudges a reconnect attempt and reports failure instead of opening the
    /// link itself: every (re)connection publishes a `connect` event, and the
    /// subscriber that handles it is expected to call `authenticate` again,
    /// so a fresh login reaches the server on each new link.
    pub fn authenticate(&self, user_id: &str, is_privileged: bool) -> bool {
        if user_id.is_empty() || !self.started.load(Ordering::SeqCst) {
            return false;
        }
        if !self.is_connected() {
            self.retry_nudge.notify_one();
            return false;
        }
        let event = if is_privileged {
            EVENT_ADMIN_LOGIN
        } else {
            EVENT_CUSTOMER_LOGIN
        };
        self.emit(
            event,
            json!({
                "userId": user_id,
                "authData": {
                    "role": if is_privileged { "admin" } else { "customer" },
                    "timestamp": now_millis(),
                    "client": "storefront-rt",
                },
            }),
        )
    }

    /// Sends a liveness probe tagged with the current page. Nudges a
    /// reconnect when the link is down.
    pub fn check_connection(&self, page: &str) -> bool {
        if !self.is_connected() {
            self.retry_nudge.notify_one();
        }
        self.emit(
            EVENT_CHECK_CONNECTION,
            json!({
                "page": page,
                "timestamp": now_millis(),
                "userId": self.identity(),
            }),
        )
    }

    /// Forces the current link down and re-establishes it.
    pub fn reconnect(&self) {
        self.force_reconnect.notify_one();
    }

    async fn run(&self) {
        loop {
            match self.establish().await {
                Some(stream) => {
                    let forced = self.serve(stream).await;
                    self.set_status(ChannelStatus::Disconnected);
                    self.publish(ChannelEvent::new(
                        EVENT_DISCONNECT,
                        json!({"reason": if forced { "forced" } else { "transport" }}),
                    ));
                    self.arm_fallback();
                    let delay = if forced {
                        self.config.forced_reconnect_delay
                    } else {
                        self.config.reconnect_delay
                    };
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        attempts = self.config.max_reconnect_attempts,
                        "reconnect attempts exhausted, waiting for a nudge"
                    );
                    self.set_status(ChannelStatus::Disconnected);
                    self.arm_fallback();
                    tokio::select! {
                        _ = self.retry_nudge.notified() => {}
                        _ = self.force_reconnect.notified() => {}
                    }
                }
            }
        }
    }

    /// Runs one bounded round of connection attempts.
    async fn establish(&self) -> Option<WsStream> {
        for attempt in 1..=self.config.max_reconnect_attempts {
            self.set_status(ChannelStatus::Connecting);
            match timeout(
                self.config.connect_timeout,
                connect_async(self.config.endpoint.as_str()),
            )
            .await
            {
                Ok(Ok((stream, _response))) => return Some(stream),
                Ok(Err(error)) => {
                    warn!(%error, attempt, endpoint = %self.config.endpoint, "connection attempt failed");
                }
                Err(_) => {
                    warn!(attempt, endpoint = %self.config.endpoint, "connection attempt timed out");
                }
            }
            if attempt < self.config.max_reconnect_attempts {
                tokio::time::sleep(self.config.reconnect_delay).await;
            }
        }
        None
    }

    /// Drives one established link until it dies. Returns true when the
    /// teardown was a forced reconnect.
    async fn serve(&self, stream: WsStream) -> bool {
        self.on_connected();

        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock().expect("channel outbound lock poisoned") = Some(tx);

        let mut forced = false;
        loop {
            tokio::select! {
                inbound = read.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => self.on_frame(text.as_str()),
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            self.touch();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("event channel closed by peer");
                            break;
                        }
                        Some(Err(error)) => {
                            warn!(%error, "event channel read failed");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
                frame = rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if write.send(Message::Text(frame.into())).await.is_err() {
                                warn!("event channel write failed");
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = self.force_reconnect.notified() => {
                    info!("forced reconnect requested");
                    let _ = write.send(Message::Close(None)).await;
                    forced = true;
                    break;
                }
            }
        }

        *self.outbound.lock().expect("channel outbound lock poisoned") = None;
        forced
    }

    fn on_connected(&self) {
        self.cancel_fallback();
        self.set_status(ChannelStatus::Connected);
        self.touch();
        {
            let mut identity = self.identity.lock().expect("channel identity lock poisoned");
            if identity.is_none() {
                *identity = Some(local_id());
            }
        }
        info!(endpoint = %self.config.endpoint, "event channel connected");
        self.publish(ChannelEvent::new(EVENT_CONNECT, Value::Null));
    }

    fn on_frame(&self, raw: &str) {
        self.touch();
        let Some(event) = ChannelEvent::parse(raw) else {
            debug!(frame = %raw, "dropping malformed frame");
            return;
        };
        if self.config.diagnostics {
            debug!(event = %event.name, data = %event.data, "inbound event");
        }
        // The handshake response carries the session identity.
        if event.name == EVENT_CONNECT {
            if let Some(id) = event.data.get("id").and_then(Value::as_str) {
                *self.identity.lock().expect("channel identity lock poisoned") =
                    Some(id.to_string());
            }
        }
        self.publish(event);
    }

    fn publish(&self, event: ChannelEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn touch(&self) {
        self.last_event_ms.store(now_millis(), Ordering::SeqCst);
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.write().expect("channel status lock poisoned") = status;
    }

    /// Starts the slow retry loop unless one is already armed. The loop
    /// nudges the run loop every `fallback_retry_interval` until cancelled
    /// by a successful connection.
    fn arm_fallback(&self) {
        let mut fallback = self.fallback.lock().expect("channel fallback lock poisoned");
        if matches!(fallback.as_ref(), Some(token) if !token.is_cancelled()) {
            return;
        }
        let Some(manager) = self.weak.upgrade() else {
            return;
        };
        let token = CancellationToken::new();
        *fallback = Some(token.clone());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(manager.config.fallback_retry_interval) => {
                        if manager.is_connected() {
                            break;
                        }
                        debug!("fallback retry nudge");
                        manager.retry_nudge.notify_one();
                    }
                }
            }
        });
    }

    fn cancel_fallback(&self) {
        if let Some(token) = self
            .fallback
            .lock()
            .expect("channel fallback lock poisoned")
            .take()
        {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::testing::TestServer;
    use serde_json::json;

    fn fast_config(endpoint: &str) -> ChannelConfig {
        ChannelConfig {
            endpoint: endpoint.to_string(),
            connect_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(50),
            max_reconnect_attempts: 3,
            fallback_retry_interval: Duration::from_millis(200),
            forced_reconnect_delay: Duration::from_millis(20),
            diagnostics: false,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn connects_and_delivers_login_frame() {
        let mut server = TestServer::spawn().await;
        let manager = ChannelManager::new(fast_config(server.endpoint()));

        manager.connect();
        assert!(wait_until(|| manager.is_connected()).await);

        assert!(manager.authenticate("user-7", true));
        let frame = server.next_frame().await.expect("login frame");
        assert_eq!(frame.name, EVENT_ADMIN_LOGIN);
        assert_eq!(frame.data["userId"], "user-7");
        assert_eq!(frame.data["authData"]["role"], "admin");
    }

    #[tokio::test]
    async fn inbound_events_fan_out_to_subscribers() {
        let mut server = TestServer::spawn().await;
        let manager = ChannelManager::new(fast_config(server.endpoint()));
        let mut sub_a = manager.subscribe();
        let mut sub_b = manager.subscribe();

        manager.connect();
        assert!(wait_until(|| manager.is_connected()).await);

        // Drain the synthetic connect event both subscribers see.
        assert_eq!(sub_a.recv().await.expect("a connect").name, EVENT_CONNECT);
        assert_eq!(sub_b.recv().await.expect("b connect").name, EVENT_CONNECT);

        // Make sure the server side accepted before pushing.
        assert!(manager.check_connection("orders"));
        assert!(server.next_frame().await.is_some());

        server.push_event("new-order", json!({"orderCode": "B-3"}));
        let got_a = sub_a.recv().await.expect("a event");
        let got_b = sub_b.recv().await.expect("b event");
        assert_eq!(got_a.name, "new-order");
        assert_eq!(got_b.data["orderCode"], "B-3");
        assert!(manager.last_event_millis().is_some());
    }

    #[tokio::test]
    async fn recovers_after_server_drops_the_link() {
        let mut server = TestServer::spawn().await;
        let manager = ChannelManager::new(fast_config(server.endpoint()));

        manager.connect();
        assert!(wait_until(|| manager.is_connected()).await);
        assert_eq!(server.connections(), 1);

        server.drop_clients();
        assert!(wait_until(|| server.connections() >= 2).await);
        assert!(wait_until(|| manager.is_connected()).await);

        // The re-established link carries traffic.
        assert!(manager.check_connection("home"));
        assert!(server.next_frame().await.is_some());
    }

    #[tokio::test]
    async fn repeated_drops_open_exactly_one_connection_each() {
        let server = TestServer::spawn().await;
        let manager = ChannelManager::new(fast_config(server.endpoint()));

        manager.connect();
        assert!(wait_until(|| manager.is_connected()).await);
        assert_eq!(server.connections(), 1);

        for expected in 2..=4usize {
            server.drop_clients();
            assert!(
                wait_until(|| server.connections() == expected && manager.is_connected()).await
            );
            // Sit through a couple of fallback intervals: with the link back
            // up, the nudges must be absorbed without another connection.
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert_eq!(server.connections(), expected);
            assert!(manager.is_connected());
        }
    }

    #[tokio::test]
    async fn forced_reconnect_cycles_the_connection() {
        let mut server = TestServer::spawn().await;
        let manager = ChannelManager::new(fast_config(server.endpoint()));
        let mut events = manager.subscribe();

        manager.connect();
        assert!(wait_until(|| manager.is_connected()).await);
        events.recv().await.expect("first connect");

        manager.reconnect();
        let disconnect = events.recv().await.expect("disconnect");
        assert_eq!(disconnect.name, EVENT_DISCONNECT);
        assert_eq!(disconnect.data["reason"], "forced");

        assert_eq!(events.recv().await.expect("second connect").name, EVENT_CONNECT);
        assert!(wait_until(|| server.connections() >= 2).await);
        assert!(manager.check_connection("home"));
        assert!(server.next_frame().await.is_some());
    }

    #[tokio::test]
    async fn emits_fail_before_any_connection() {
        let manager = ChannelManager::new(fast_config("ws://127.0.0.1:1/ws"));
        assert!(!manager.emit("anything", Value::Null));
        assert!(!manager.authenticate("user-1", false));
        assert_eq!(manager.status(), ChannelStatus::Disconnected);
    }

    #[tokio::test]
    async fn authenticate_rejects_empty_user() {
        let server = TestServer::spawn().await;
        let manager = ChannelManager::new(fast_config(server.endpoint()));
        manager.connect();
        assert!(wait_until(|| manager.is_connected()).await);
        assert!(!manager.authenticate("", false));
    }
}
