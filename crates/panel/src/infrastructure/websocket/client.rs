//! Command client: JSON text frames over a WebSocket (tokio-tungstenite).
//!
//! Outbound commands go out as single complete text frames. Every inbound
//! text frame is published verbatim; parsing it is the subscriber's job.

use std::sync::Arc;
use std::time::Duration;

use enginelink_protocol::{
    command_url, encode_json, CommandEnvelope, DEFAULT_COMMAND_HOST, DEFAULT_COMMAND_PORT,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::infrastructure::error::ClientError;
use crate::infrastructure::messaging::{
    join_bounded, ClientEvent, ConnectionSlot, EventBus, LifecycleState, TeardownScope,
};

const CLIENT: &str = "command";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// Settings for one [`CommandClient`].
#[derive(Debug, Clone)]
pub struct CommandClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// How long to wait for the peer to answer our close frame.
    pub close_timeout: Duration,
    pub join_timeout: Duration,
}

impl Default for CommandClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_HOST, DEFAULT_COMMAND_PORT)
    }
}

impl CommandClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
            join_timeout: Duration::from_secs(2),
        }
    }

    pub fn url(&self) -> String {
        command_url(&self.host, self.port)
    }
}

struct CommandInner {
    config: CommandClientConfig,
    events: EventBus,
    slot: ConnectionSlot<WsSink>,
}

impl CommandInner {
    fn emit(&self, event: ClientEvent) {
        if self.slot.is_disposed() {
            return;
        }
        self.events.emit(event);
    }

    fn report(&self, error: ClientError) {
        self.emit(ClientEvent::Error(Arc::new(error)));
    }

    /// Close and release the connection selected by `scope`.
    ///
    /// Does not publish `Disconnected`; callers decide. Returns whether this
    /// call actually tore something down.
    async fn teardown(&self, scope: TeardownScope, join: bool) -> bool {
        let Some(mut conn) = self.slot.take(scope) else {
            return false;
        };

        let sink = conn.transport.take();
        if sink.is_none() {
            // Still handshaking: abort the connect.
            conn.cancel.cancel();
        }

        if let Some(sink) = &sink {
            let close = async {
                let mut sink = sink.lock().await;
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!(client = CLIENT, error = %e, "Close frame not sent");
                }
                let _ = sink.close().await;
            };
            if tokio::time::timeout(self.config.close_timeout, close)
                .await
                .is_err()
            {
                tracing::debug!(client = CLIENT, "Close handshake write timed out");
            }
        }

        if let Some(mut task) = conn.receive_task.take() {
            if join {
                // Let the loop read the peer's close reply before cancelling.
                let answered = sink.is_some()
                    && tokio::time::timeout(self.config.close_timeout, &mut task)
                        .await
                        .is_ok();
                if !answered {
                    conn.cancel.cancel();
                    join_bounded(CLIENT, task, self.config.join_timeout).await;
                }
            }
        }

        let id = conn.id;
        drop(conn);
        tracing::info!(client = CLIENT, url = %self.config.url(), connection = id, "Disconnected");
        true
    }
}

/// WebSocket command client.
///
/// Share it behind an `Arc`; every method takes `&self`. Dropping the client
/// cancels any live connection without notifications.
pub struct CommandClient {
    inner: Arc<CommandInner>,
}

impl Default for CommandClient {
    fn default() -> Self {
        Self::new(CommandClientConfig::default())
    }
}

impl CommandClient {
    pub fn new(config: CommandClientConfig) -> Self {
        Self {
            inner: Arc::new(CommandInner {
                config,
                events: EventBus::new(),
                slot: ConnectionSlot::new(CLIENT),
            }),
        }
    }

    pub fn config(&self) -> &CommandClientConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.slot.state()
    }

    /// True only while the socket is open.
    pub fn is_connected(&self) -> bool {
        self.inner.slot.is_live()
    }

    /// Connect, publishing faults as `Error` notifications.
    ///
    /// Returns true without doing anything if already connected or
    /// connecting. True therefore means "connected or a connect is in
    /// progress"; that other attempt may still fail. Use [`Self::state`] to
    /// tell the two apart.
    pub async fn connect(&self) -> bool {
        match self.try_connect().await {
            Ok(()) => true,
            Err(e @ ClientError::Disposed { .. }) => {
                tracing::error!(client = CLIENT, "{}", e);
                false
            }
            Err(ClientError::Cancelled) => {
                tracing::debug!(client = CLIENT, "Connect cancelled");
                false
            }
            Err(e) => {
                tracing::error!(client = CLIENT, url = %self.inner.config.url(), error = %e, "Failed to connect");
                self.inner.report(e);
                false
            }
        }
    }

    /// Connect, returning the fault instead of publishing it.
    pub async fn try_connect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let Some((id, cancel)) = inner.slot.begin_if_idle()? else {
            tracing::debug!(client = CLIENT, "Already connected or connecting");
            return Ok(());
        };

        let url = inner.config.url();
        tracing::debug!(client = CLIENT, %url, connection = id, "Connecting");

        let handshake = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = tokio::time::timeout(inner.config.connect_timeout, connect_async(url.as_str())) => {
                match result {
                    Ok(Ok((ws, _response))) => Ok(ws),
                    Ok(Err(e)) => Err(ClientError::WebSocket(e)),
                    Err(_) => Err(ClientError::ConnectTimeout {
                        target: url.clone(),
                        timeout: inner.config.connect_timeout,
                    }),
                }
            }
        };

        let ws = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                inner.teardown(TeardownScope::Only(id), true).await;
                return Err(e);
            }
        };

        let (sink, stream) = ws.split();
        if inner.slot.establish(id, Arc::new(Mutex::new(sink))).is_err() {
            return Err(ClientError::Cancelled);
        }

        tracing::info!(client = CLIENT, %url, connection = id, "Connected");
        inner.emit(ClientEvent::Connected);

        let loop_inner = Arc::clone(&self.inner);
        let spawned = inner.slot.attach_task(id, move || {
            tokio::spawn(receive_loop(loop_inner, id, stream, cancel))
        });
        if !spawned {
            return Err(ClientError::Cancelled);
        }
        Ok(())
    }

    /// Close gracefully (normal closure) and release the socket.
    ///
    /// Always publishes `Disconnected` afterwards, even when nothing was
    /// connected, unless another teardown of the same client is already
    /// in flight and will publish it.
    pub async fn disconnect(&self) {
        let tore_down = self.inner.teardown(TeardownScope::Current, true).await;
        if !tore_down && self.inner.slot.teardowns_in_flight() > 0 {
            return;
        }
        self.inner.emit(ClientEvent::Disconnected);
    }

    /// Send `{"type":"cmd","name":…,"args":…}`.
    pub async fn send_command(&self, name: &str, args: Option<Value>) -> bool {
        self.send_json(&CommandEnvelope::new(name, args)).await
    }

    /// Send any serializable value as one compact JSON text frame.
    ///
    /// No-op (false) when not connected. Faults are published as `Error`.
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        let Some((sink, cancel)) = self.inner.slot.transport() else {
            tracing::debug!(client = CLIENT, "send_json while not connected");
            return false;
        };

        let frame = match encode_json(value) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(client = CLIENT, error = %e, "Failed to serialize message");
                self.inner.report(ClientError::Serialize(e));
                return false;
            }
        };
        let len = frame.len();

        let send = async {
            let mut sink = sink.lock().await;
            sink.send(Message::Text(frame)).await
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(client = CLIENT, "send_json interrupted by disconnect");
                return false;
            }
            sent = send => sent,
        };

        match sent {
            Ok(()) => {
                tracing::trace!(client = CLIENT, bytes = len, "Sent frame");
                true
            }
            Err(e) => {
                tracing::warn!(client = CLIENT, error = %e, "Failed to send message");
                self.inner.report(ClientError::WebSocket(e));
                false
            }
        }
    }

    /// Permanently disable the client, waiting for teardown to finish.
    /// No notifications fire from here on.
    pub async fn dispose(&self) {
        if !self.inner.slot.dispose() {
            return;
        }
        self.inner.teardown(TeardownScope::Current, true).await;
        if !self.inner.slot.drained(self.inner.config.join_timeout).await {
            tracing::warn!(client = CLIENT, "Teardown still running after dispose");
        }
        tracing::debug!(client = CLIENT, "Disposed");
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        self.inner.slot.abandon();
    }
}

impl std::fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandClient")
            .field("url", &self.inner.config.url())
            .field("state", &self.state())
            .finish()
    }
}

async fn receive_loop(
    inner: Arc<CommandInner>,
    id: u64,
    mut stream: SplitStream<WsStream>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(client = CLIENT, connection = id, "Receive loop cancelled");
                break;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                tracing::trace!(client = CLIENT, bytes = text.len(), "Received frame");
                inner.emit(ClientEvent::MessageReceived(text));
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(client = CLIENT, connection = id, ?frame, "Server closed connection");
                break;
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::debug!(client = CLIENT, bytes = data.len(), "Ignoring binary frame");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if !cancel.is_cancelled() {
                    tracing::error!(client = CLIENT, connection = id, error = %e, "WebSocket error");
                    inner.report(ClientError::WebSocket(e));
                }
                break;
            }
            None => {
                tracing::info!(client = CLIENT, connection = id, "Stream ended");
                break;
            }
        }
    }

    if inner.teardown(TeardownScope::Only(id), false).await {
        inner.emit(ClientEvent::Disconnected);
    }
}
