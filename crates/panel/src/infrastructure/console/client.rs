//! Console client: newline-framed text over a raw TCP stream.
//!
//! Outbound text is written one line at a time with Nagle disabled so every
//! `send_line` goes out immediately. Inbound reads are decoded and published
//! as-is; chunk boundaries are whatever the socket delivers.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use enginelink_protocol::{frame_line, Utf8ChunkDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::error::ClientError;
use crate::infrastructure::messaging::{
    join_bounded, ClientEvent, ConnectionSlot, EventBus, LifecycleState, TeardownGuard,
    TeardownScope,
};

const CLIENT: &str = "console";

/// Settings for one [`ConsoleClient`]. Host and port have no default.
#[derive(Debug, Clone)]
pub struct ConsoleClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Upper bound for the best-effort flush during teardown.
    pub flush_timeout: Duration,
    /// Upper bound for joining the receive loop during teardown.
    pub join_timeout: Duration,
    pub read_buffer_size: usize,
}

impl ConsoleClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_millis(500),
            join_timeout: Duration::from_secs(2),
            read_buffer_size: 4096,
        }
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

type ConsoleWriter = Arc<Mutex<OwnedWriteHalf>>;

struct ConsoleInner {
    config: ConsoleClientConfig,
    events: EventBus,
    slot: ConnectionSlot<ConsoleWriter>,
}

impl ConsoleInner {
    /// Publish unless disposed.
    fn emit(&self, event: ClientEvent) {
        if self.slot.is_disposed() {
            return;
        }
        self.events.emit(event);
    }

    fn report(&self, error: ClientError) {
        self.emit(ClientEvent::Error(Arc::new(error)));
    }

    /// Release connection resources. Returns whether anything was torn down.
    ///
    /// `join` is false when called from the receive loop itself.
    async fn teardown(&self, scope: TeardownScope, raise_event: bool, join: bool) -> bool {
        let Some(conn) = self.slot.take(scope) else {
            return false;
        };
        self.release(conn, raise_event, join).await;
        true
    }

    async fn release(
        &self,
        mut conn: TeardownGuard<'_, ConsoleWriter>,
        raise_event: bool,
        join: bool,
    ) {
        conn.cancel.cancel();

        let had_handle = conn.transport.is_some();
        if let Some(writer) = conn.transport.take() {
            let flush = async {
                let mut writer = writer.lock().await;
                let _ = writer.flush().await;
                let _ = writer.shutdown().await;
            };
            if tokio::time::timeout(self.config.flush_timeout, flush)
                .await
                .is_err()
            {
                tracing::debug!(client = CLIENT, "Flush on teardown timed out");
            }
        }

        if let Some(task) = conn.receive_task.take() {
            if join {
                join_bounded(CLIENT, task, self.config.join_timeout).await;
            }
        }

        let notify = raise_event && (conn.established || had_handle);
        let id = conn.id;
        drop(conn);

        tracing::info!(
            client = CLIENT,
            target = %self.config.target(),
            connection = id,
            "Disconnected"
        );
        if notify {
            self.emit(ClientEvent::Disconnected);
        }
    }
}

/// TCP console client.
///
/// Share it behind an `Arc`; every method takes `&self` and may be called
/// while the receive loop runs. Dropping the client cancels any live
/// connection without notifications.
pub struct ConsoleClient {
    inner: Arc<ConsoleInner>,
}

impl ConsoleClient {
    pub fn new(config: ConsoleClientConfig) -> Self {
        Self {
            inner: Arc::new(ConsoleInner {
                config,
                events: EventBus::new(),
                slot: ConnectionSlot::new(CLIENT),
            }),
        }
    }

    pub fn config(&self) -> &ConsoleClientConfig {
        &self.inner.config
    }

    /// Subscription point for this client's notifications.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.slot.state()
    }

    /// True while the stream is open for both reading and writing.
    pub fn is_connected(&self) -> bool {
        self.inner.slot.is_live()
    }

    /// Connect, publishing faults as `Error` notifications.
    ///
    /// An existing connection is torn down first without a `Disconnected`
    /// notification.
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
                tracing::warn!(client = CLIENT, target = %self.inner.config.target(), error = %e, "Connect failed");
                self.inner.report(e);
                false
            }
        }
    }

    /// Connect, returning the fault instead of publishing it.
    pub async fn try_connect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let started = inner.slot.begin()?;
        let (id, cancel) = (started.id, started.cancel.clone());
        if let Some(previous) = started.displaced {
            tracing::debug!(client = CLIENT, connection = previous.id, "Replacing live connection");
            inner.release(previous, false, true).await;
        }

        tracing::debug!(client = CLIENT, target = %inner.config.target(), connection = id, "Connecting");

        let dialed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            dialed = tokio::time::timeout(inner.config.connect_timeout, dial(&inner.config)) => {
                dialed.unwrap_or_else(|_| Err(ClientError::ConnectTimeout {
                    target: inner.config.target(),
                    timeout: inner.config.connect_timeout,
                }))
            }
        };

        let stream = match dialed.and_then(|stream| {
            stream.set_nodelay(true)?;
            Ok(stream)
        }) {
            Ok(stream) => stream,
            Err(e) => {
                inner.teardown(TeardownScope::Only(id), false, true).await;
                return Err(e);
            }
        };

        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        if inner.slot.establish(id, Arc::new(Mutex::new(writer))).is_err() {
            return Err(ClientError::Cancelled);
        }

        tracing::info!(client = CLIENT, peer = ?peer, connection = id, "Connected");
        inner.emit(ClientEvent::Connected);

        let loop_inner = Arc::clone(&self.inner);
        let spawned = inner.slot.attach_task(id, move || {
            tokio::spawn(receive_loop(loop_inner, id, reader, cancel))
        });
        if !spawned {
            return Err(ClientError::Cancelled);
        }
        Ok(())
    }

    /// Tear down the connection. Safe to call when not connected.
    ///
    /// `Disconnected` fires only if a connection had been established and
    /// `raise_event` is true.
    pub async fn disconnect(&self, raise_event: bool) {
        self.inner
            .teardown(TeardownScope::Current, raise_event, true)
            .await;
    }

    /// Send one line. A trailing `\n` is appended unless present.
    ///
    /// Returns false without a notification when not connected; I/O faults
    /// are published as `Error` and also yield false.
    pub async fn send_line(&self, text: &str) -> bool {
        let Some((writer, cancel)) = self.inner.slot.transport() else {
            tracing::debug!(client = CLIENT, "send_line while not connected");
            return false;
        };

        let line = frame_line(text);
        let write = async {
            let mut writer = writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };

        let written: io::Result<()> = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(client = CLIENT, "send_line interrupted by disconnect");
                return false;
            }
            written = write => written,
        };

        match written {
            Ok(()) => {
                tracing::trace!(client = CLIENT, bytes = line.len(), "Sent line");
                true
            }
            Err(e) => {
                tracing::warn!(client = CLIENT, error = %e, "Send failed");
                self.inner.report(ClientError::Io(e));
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
        self.inner
            .teardown(TeardownScope::Current, false, true)
            .await;
        if !self.inner.slot.drained(self.inner.config.join_timeout).await {
            tracing::warn!(client = CLIENT, "Teardown still running after dispose");
        }
        tracing::debug!(client = CLIENT, "Disposed");
    }
}

impl Drop for ConsoleClient {
    fn drop(&mut self) {
        self.inner.slot.abandon();
    }
}

impl std::fmt::Debug for ConsoleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleClient")
            .field("target", &self.inner.config.target())
            .field("state", &self.state())
            .finish()
    }
}

/// Resolve and connect, trying each resolved address in turn.
async fn dial(config: &ConsoleClientConfig) -> Result<TcpStream, ClientError> {
    let addrs = lookup_host((config.host.as_str(), config.port))
        .await
        .map_err(|source| ClientError::Resolve {
            host: config.host.clone(),
            port: config.port,
            source,
        })?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(client = CLIENT, %addr, error = %e, "Address refused");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(source) => ClientError::Connect {
            target: config.target(),
            source,
        },
        None => ClientError::Resolve {
            host: config.host.clone(),
            port: config.port,
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        },
    })
}

/// Read until EOF, cancellation or fault, then tear the connection down.
async fn receive_loop(
    inner: Arc<ConsoleInner>,
    id: u64,
    mut reader: OwnedReadHalf,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; inner.config.read_buffer_size.max(1)];
    let mut decoder = Utf8ChunkDecoder::new();

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(client = CLIENT, connection = id, "Receive loop cancelled");
                break;
            }
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                if let Some(tail) = decoder.finish() {
                    inner.emit(ClientEvent::MessageReceived(tail));
                }
                tracing::info!(client = CLIENT, connection = id, "Peer closed the stream");
                break;
            }
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    tracing::trace!(client = CLIENT, bytes = n, "Received chunk");
                    inner.emit(ClientEvent::MessageReceived(text));
                }
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    tracing::warn!(client = CLIENT, connection = id, error = %e, "Read failed");
                    inner.report(ClientError::Io(e));
                }
                break;
            }
        }
    }

    drop(reader);
    inner.teardown(TeardownScope::Only(id), true, false).await;
}
