//! [`CommandPort`] implementation backed by [`CommandClient`].

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::CommandClient;
use crate::infrastructure::messaging::{ClientEvent, LifecycleState};
use crate::ports::outbound::CommandPort;

#[async_trait]
impl CommandPort for CommandClient {
    async fn connect(&self) -> bool {
        CommandClient::connect(self).await
    }

    async fn disconnect(&self) {
        CommandClient::disconnect(self).await
    }

    async fn send_command(&self, name: &str, args: Option<Value>) -> bool {
        CommandClient::send_command(self, name, args).await
    }

    async fn send_json(&self, value: &Value) -> bool {
        CommandClient::send_json(self, value).await
    }

    fn is_connected(&self) -> bool {
        CommandClient::is_connected(self)
    }

    fn state(&self) -> LifecycleState {
        CommandClient::state(self)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.events().subscribe_channel()
    }

    async fn dispose(&self) {
        CommandClient::dispose(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::testing::{accept, ws_peer, EVENT_WAIT};
    use crate::infrastructure::websocket::CommandClientConfig;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_port_sends_through_client() {
        let (addr, mut peers) = ws_peer().await;
        let port: Arc<dyn CommandPort> = Arc::new(CommandClient::new(CommandClientConfig::new(
            addr.ip().to_string(),
            addr.port(),
        )));
        let mut events = port.subscribe();

        assert!(port.connect().await);
        let mut peer = accept(&mut peers).await;
        assert!(matches!(events.recv().await, Some(ClientEvent::Connected)));

        assert!(port.send_json(&json!({ "type": "hello" })).await);
        let frame = tokio::time::timeout(EVENT_WAIT, peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text(r#"{"type":"hello"}"#.to_string()));
        assert_eq!(port.state(), LifecycleState::Connected);
    }
}
