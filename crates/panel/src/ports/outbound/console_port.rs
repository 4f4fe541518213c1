//! Console Port - line-oriented text channel to the engine console

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::infrastructure::messaging::{ClientEvent, LifecycleState};

/// Port for the engine's TCP console.
///
/// Inbound text arrives as `ClientEvent::MessageReceived` chunks with no
/// line reassembly.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ConsolePort: Send + Sync {
    /// Open the connection, replacing any existing one. False on failure.
    async fn connect(&self) -> bool;

    /// Close the connection. `raise_event` controls whether `Disconnected`
    /// is published.
    async fn disconnect(&self, raise_event: bool);

    /// Send one newline-terminated line. False when not connected.
    async fn send_line(&self, line: &str) -> bool;

    fn is_connected(&self) -> bool;

    fn state(&self) -> LifecycleState;

    /// Receive every notification published from now on.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent>;

    async fn dispose(&self);
}
