//! [`ConsolePort`] implementation backed by [`ConsoleClient`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::ConsoleClient;
use crate::infrastructure::messaging::{ClientEvent, LifecycleState};
use crate::ports::outbound::ConsolePort;

#[async_trait]
impl ConsolePort for ConsoleClient {
    async fn connect(&self) -> bool {
        ConsoleClient::connect(self).await
    }

    async fn disconnect(&self, raise_event: bool) {
        ConsoleClient::disconnect(self, raise_event).await
    }

    async fn send_line(&self, line: &str) -> bool {
        ConsoleClient::send_line(self, line).await
    }

    fn is_connected(&self) -> bool {
        ConsoleClient::is_connected(self)
    }

    fn state(&self) -> LifecycleState {
        ConsoleClient::state(self)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.events().subscribe_channel()
    }

    async fn dispose(&self) {
        ConsoleClient::dispose(self).await
    }
}
