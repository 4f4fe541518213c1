//! Command Port - JSON command channel to the engine

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::infrastructure::messaging::{ClientEvent, LifecycleState};

/// Port for the engine's WebSocket command endpoint.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommandPort: Send + Sync {
    /// Open the connection. A no-op returning true when already connected
    /// or while another connect is still handshaking, so true does not
    /// guarantee an open socket; see `state()`.
    async fn connect(&self) -> bool;

    /// Close gracefully. Always followed by `Disconnected`.
    async fn disconnect(&self);

    /// Send a `{"type":"cmd",...}` envelope. False when not connected.
    async fn send_command(&self, name: &str, args: Option<Value>) -> bool;

    /// Send an arbitrary JSON value as one text frame.
    async fn send_json(&self, value: &Value) -> bool;

    fn is_connected(&self) -> bool;

    fn state(&self) -> LifecycleState;

    /// Receive every notification published from now on.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent>;

    async fn dispose(&self);
}
