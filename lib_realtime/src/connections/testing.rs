//! In-process WebSocket server for exercising the channel manager and the
//! notification engine over a real TCP link. Test-only; unwraps freely.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use super::events::ChannelEvent;

pub(crate) struct TestServer {
    endpoint: String,
    frames: mpsc::UnboundedReceiver<String>,
    push: broadcast::Sender<String>,
    accepted: Arc<AtomicUsize>,
    drop_signal: broadcast::Sender<()>,
}

impl TestServer {
    pub(crate) async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = format!("ws://{addr}/ws");

        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<String>();
        let (push_tx, _) = broadcast::channel::<String>(64);
        let (drop_tx, _) = broadcast::channel::<()>(16);
        let accepted = Arc::new(AtomicUsize::new(0));

        {
            let push_tx = push_tx.clone();
            let drop_tx = drop_tx.clone();
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);

                    let frames_tx = frames_tx.clone();
                    let mut push_rx = push_tx.subscribe();
                    let mut drop_rx = drop_tx.subscribe();
                    tokio::spawn(async move {
                        let ws = match accept_async(stream).await {
                            Ok(ws) => ws,
                            Err(_) => return,
                        };
                        let (mut write, mut read) = ws.split();
                        loop {
                            tokio::select! {
                                inbound = read.next() => {
                                    match inbound {
                                        Some(Ok(Message::Text(text))) => {
                                            let _ = frames_tx.send(text.as_str().to_string());
                                        }
                                        Some(Ok(Message::Close(_))) | None => break,
                                        Some(Err(_)) => break,
                                        Some(Ok(_)) => {}
                                    }
                                }
                                outbound = push_rx.recv() => {
                                    match outbound {
                                        Ok(frame) => {
                                            if write.send(Message::Text(frame.into())).await.is_err() {
                                                break;
                                            }
                                        }
                                        Err(broadcast::error::RecvError::Closed) => break,
                                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                                    }
                                }
                                _ = drop_rx.recv() => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break;
                                }
                            }
                        }
                    });
                }
            });
        }

        Self {
            endpoint,
            frames: frames_rx,
            push: push_tx,
            accepted,
            drop_signal: drop_tx,
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Pushes an event to every connected client.
    pub(crate) fn push_event(&self, name: &str, data: Value) {
        let _ = self.push.send(ChannelEvent::new(name, data).to_frame());
    }

    /// Closes every live connection, leaving the listener up.
    pub(crate) fn drop_clients(&self) {
        let _ = self.drop_signal.send(());
    }

    /// Total connections accepted since startup.
    pub(crate) fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next frame received from any client, parsed; `None` on timeout.
    pub(crate) async fn next_frame(&mut self) -> Option<ChannelEvent> {
        let raw = timeout(Duration::from_secs(2), self.frames.recv())
            .await
            .ok()??;
        ChannelEvent::parse(&raw)
    }
}
