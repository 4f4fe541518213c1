#![allow(clippy::unwrap_used)]

//! Loopback peers and an event recorder used across client tests.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;

use crate::infrastructure::messaging::{ClientEvent, EventBus};

/// Default wait used by tests for something that should happen promptly.
pub const EVENT_WAIT: Duration = Duration::from_secs(2);

/// Default window used by tests to assert that nothing else happens.
pub const QUIET_WAIT: Duration = Duration::from_millis(150);

/// Channel-backed subscriber that records every event of one bus.
pub struct EventRecorder {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        Self {
            rx: bus.subscribe_channel(),
        }
    }

    /// Next event, or `None` if nothing arrives within `within`.
    pub async fn next(&mut self, within: Duration) -> Option<ClientEvent> {
        tokio::time::timeout(within, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip events until one matches `predicate`.
    pub async fn wait_for(
        &mut self,
        within: Duration,
        mut predicate: impl FnMut(&ClientEvent) -> bool,
    ) -> Option<ClientEvent> {
        tokio::time::timeout(within, async {
            while let Some(event) = self.rx.recv().await {
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Collect text from `MessageReceived` events until it contains `needle`.
    pub async fn text_until(&mut self, within: Duration, needle: &str) -> String {
        let mut text = String::new();
        let _ = tokio::time::timeout(within, async {
            while let Some(event) = self.rx.recv().await {
                if let ClientEvent::MessageReceived(chunk) = event {
                    text.push_str(&chunk);
                    if text.contains(needle) {
                        return;
                    }
                }
            }
        })
        .await;
        text
    }

    /// Everything that arrives during `window`.
    pub async fn collect(&mut self, window: Duration) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        let _ = tokio::time::timeout(window, async {
            while let Some(event) = self.rx.recv().await {
                events.push(event);
            }
        })
        .await;
        events
    }

    /// Events already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Names of the events, for compact assertions.
pub fn kinds(events: &[ClientEvent]) -> Vec<&'static str> {
    events.iter().map(ClientEvent::kind).collect()
}

/// Raw TCP listener on an ephemeral loopback port. Accepted streams are
/// handed to the test through the returned channel.
pub async fn tcp_peer() -> (SocketAddr, mpsc::UnboundedReceiver<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if tx.send(stream).is_err() {
                break;
            }
        }
    });

    (addr, rx)
}

/// WebSocket listener on an ephemeral loopback port. Each accepted stream
/// completes the server handshake before it is handed over.
pub async fn ws_peer() -> (SocketAddr, mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    let _ = tx.send(ws);
                }
            });
        }
    });

    (addr, rx)
}

/// Address on loopback with nothing listening, so connects are refused.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Yield until `condition` holds. False if `within` elapses first.
pub async fn until(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(within, async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .is_ok()
}

/// Accept the next peer connection or fail the test.
pub async fn accept<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(EVENT_WAIT, rx.recv())
        .await
        .expect("peer did not accept in time")
        .expect("listener stopped")
}
