//! EngineLink Protocol - wire vocabulary shared by the panel clients.
//!
//! Two independent protocols are spoken to a running engine instance:
//!
//! - the **console** protocol: newline-terminated UTF-8 text over a raw TCP
//!   stream ([`console`])
//! - the **command** protocol: JSON text frames over a WebSocket
//!   ([`messages`])
//!
//! This crate only knows how bytes and frames look. Connection handling lives
//! in `enginelink-panel`.

pub mod console;
pub mod messages;

pub use console::{frame_line, Utf8ChunkDecoder};
pub use messages::{encode_command, encode_json, CommandEnvelope, StateMessage, COMMAND_TYPE};

/// Host the command socket listens on when nothing else is configured.
pub const DEFAULT_COMMAND_HOST: &str = "127.0.0.1";

/// Port the command socket listens on when nothing else is configured.
pub const DEFAULT_COMMAND_PORT: u16 = 31338;

/// Build the WebSocket URL for a command endpoint.
pub fn command_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_url_uses_plain_ws_scheme() {
        assert_eq!(
            command_url(DEFAULT_COMMAND_HOST, DEFAULT_COMMAND_PORT),
            "ws://127.0.0.1:31338"
        );
    }
}
