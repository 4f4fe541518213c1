//! Client error types.
//!
//! Every fault a client can observe is funnelled into [`ClientError`]. Network
//! faults are never returned across the public boundary of the clients; they
//! are published as `ClientEvent::Error` and resolved into a teardown. The one
//! exception is use-after-dispose, which `try_connect` returns directly.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Fault raised by the console or command client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Host name did not resolve to any address.
    #[error("Failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// TCP connect was refused or otherwise failed.
    #[error("Connection to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect did not complete in time.
    #[error("Connection to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    /// Read, write or flush failed on an open stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Outbound value could not be serialized.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The client was disposed and can no longer be used.
    #[error("{client} client used after dispose")]
    Disposed { client: &'static str },

    /// The connect attempt was cancelled by a concurrent disconnect or dispose.
    #[error("Connect cancelled")]
    Cancelled,
}

impl ClientError {
    /// True for faults that come from the network rather than from misuse.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Resolve { .. }
                | Self::Connect { .. }
                | Self::ConnectTimeout { .. }
                | Self::Io(_)
                | Self::WebSocket(_)
        )
    }
}
