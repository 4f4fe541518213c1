//! Command socket message types.
//!
//! Outbound commands are wrapped in a fixed envelope:
//!
//! ```json
//! {"type":"cmd","name":"seek","args":{"t":1.5}}
//! ```
//!
//! Inbound frames carry engine state. The client never enforces a schema on
//! them; [`StateMessage`] is a convenience for callers that want the `type`
//! discriminator lifted out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Value of the `type` field on every outbound command.
pub const COMMAND_TYPE: &str = "cmd";

/// Outbound command envelope.
///
/// Field order is part of the wire format: `type`, `name`, `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// `null` when the command takes no arguments.
    pub args: Value,
}

impl CommandEnvelope {
    pub fn new(name: impl Into<String>, args: Option<Value>) -> Self {
        Self {
            kind: COMMAND_TYPE.to_string(),
            name: name.into(),
            args: args.unwrap_or(Value::Null),
        }
    }
}

/// Serialize any value as a compact JSON text frame.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Serialize a named command with optional arguments.
pub fn encode_command(name: &str, args: Option<Value>) -> Result<String, serde_json::Error> {
    encode_json(&CommandEnvelope::new(name, args))
}

/// Loosely parsed inbound frame: the `type` discriminator plus everything else.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateMessage {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl StateMessage {
    /// Parse an inbound text frame. Fails if the frame is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Look up a top-level field other than `type`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_with_args_matches_wire_format() {
        let frame = encode_command("seek", Some(json!({ "t": 1.5 }))).unwrap();
        assert_eq!(frame, r#"{"type":"cmd","name":"seek","args":{"t":1.5}}"#);
    }

    #[test]
    fn test_command_without_args_sends_null() {
        let frame = encode_command("pause", None).unwrap();
        assert_eq!(frame, r#"{"type":"cmd","name":"pause","args":null}"#);
    }

    #[test]
    fn test_encode_json_is_compact() {
        let frame = encode_json(&json!({ "a": [1, 2], "b": "x y" })).unwrap();
        assert!(!frame.contains('\n'));
        assert!(!frame.contains(": "));
    }

    #[test]
    fn test_state_message_lifts_type() {
        let msg = StateMessage::parse(r#"{"type":"state","frame":42,"paused":false}"#).unwrap();
        assert_eq!(msg.kind.as_deref(), Some("state"));
        assert_eq!(msg.field("frame"), Some(&json!(42)));
        assert!(msg.field("type").is_none());
    }

    #[test]
    fn test_state_message_without_type() {
        let msg = StateMessage::parse(r#"{"frame":1}"#).unwrap();
        assert!(msg.kind.is_none());
    }

    #[test]
    fn test_state_message_rejects_non_object() {
        assert!(StateMessage::parse("[1,2,3]").is_err());
        assert!(StateMessage::parse("not json").is_err());
    }
}
