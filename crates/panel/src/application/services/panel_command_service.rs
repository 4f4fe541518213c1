//! Panel command service - routes operator input to the engine connections
//!
//! Input grammar:
//! - `/cmd <name> [json-args]` sends a command envelope
//! - `/json <json>` sends a raw JSON frame
//! - `/connect`, `/disconnect`, `/status` drive both connections
//! - anything else is written to the console as one line

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::infrastructure::messaging::LifecycleState;
use crate::ports::outbound::{CommandPort, ConsolePort};

/// What handling one line of input did.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelReply {
    /// A message was handed to a connection; `delivered` is false when the
    /// connection was down.
    Sent { delivered: bool },
    Connected {
        console: Option<bool>,
        command: bool,
    },
    Disconnected,
    Status {
        console: Option<LifecycleState>,
        command: LifecycleState,
    },
}

impl fmt::Display for PanelReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelReply::Sent { delivered: true } => write!(f, "sent"),
            PanelReply::Sent { delivered: false } => write!(f, "not connected, nothing sent"),
            PanelReply::Connected { console, command } => {
                let console = match console {
                    Some(true) => "up",
                    Some(false) => "failed",
                    None => "not configured",
                };
                let command = if *command { "up" } else { "failed" };
                write!(f, "console {console}, command {command}")
            }
            PanelReply::Disconnected => write!(f, "disconnected"),
            PanelReply::Status { console, command } => match console {
                Some(console) => write!(f, "console {console}, command {command}"),
                None => write!(f, "console not configured, command {command}"),
            },
        }
    }
}

/// Routes operator input to the console and command ports.
pub struct PanelCommandService {
    console: Option<Arc<dyn ConsolePort>>,
    command: Arc<dyn CommandPort>,
    held: AtomicBool,
}

impl PanelCommandService {
    pub fn new(console: Option<Arc<dyn ConsolePort>>, command: Arc<dyn CommandPort>) -> Self {
        Self {
            console,
            command,
            held: AtomicBool::new(false),
        }
    }

    pub fn console(&self) -> Option<&Arc<dyn ConsolePort>> {
        self.console.as_ref()
    }

    pub fn command(&self) -> &Arc<dyn CommandPort> {
        &self.command
    }

    /// True after an operator `/disconnect` until the next `/connect`.
    /// Reconnect supervisors must leave the connections alone meanwhile.
    pub fn is_held_down(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Handle one line of operator input.
    pub async fn handle(&self, input: &str) -> Result<PanelReply> {
        let trimmed = input.trim();

        if let Some(rest) = strip_directive(trimmed, "/cmd") {
            let (name, args) = parse_command(rest)?;
            let delivered = self.command.send_command(name, args).await;
            return Ok(PanelReply::Sent { delivered });
        }

        if let Some(rest) = strip_directive(trimmed, "/json") {
            if rest.is_empty() {
                bail!("usage: /json <json>");
            }
            let value: Value = serde_json::from_str(rest).context("invalid JSON")?;
            let delivered = self.command.send_json(&value).await;
            return Ok(PanelReply::Sent { delivered });
        }

        match trimmed {
            "/connect" => Ok(self.connect_all().await),
            "/disconnect" => {
                self.disconnect_all().await;
                Ok(PanelReply::Disconnected)
            }
            "/status" => Ok(self.status()),
            _ => {
                let Some(console) = &self.console else {
                    bail!("no console configured; use /cmd or /json");
                };
                let delivered = console.send_line(input).await;
                Ok(PanelReply::Sent { delivered })
            }
        }
    }

    pub async fn connect_all(&self) -> PanelReply {
        self.held.store(false, Ordering::SeqCst);
        let console = match &self.console {
            Some(console) => Some(console.connect().await),
            None => None,
        };
        let command = self.command.connect().await;
        PanelReply::Connected { console, command }
    }

    pub async fn disconnect_all(&self) {
        self.held.store(true, Ordering::SeqCst);
        if let Some(console) = &self.console {
            console.disconnect(true).await;
        }
        self.command.disconnect().await;
    }

    pub fn status(&self) -> PanelReply {
        PanelReply::Status {
            console: self.console.as_ref().map(|c| c.state()),
            command: self.command.state(),
        }
    }

    /// Dispose both connections. Nothing is published afterwards.
    pub async fn shutdown(&self) {
        self.held.store(true, Ordering::SeqCst);
        if let Some(console) = &self.console {
            console.dispose().await;
        }
        self.command.dispose().await;
    }
}

/// `"/cmd seek {}"` with directive `"/cmd"` gives `Some("seek {}")`.
/// Does not match `"/cmdx"`.
fn strip_directive<'a>(input: &'a str, directive: &str) -> Option<&'a str> {
    let rest = input.strip_prefix(directive)?;
    if rest.is_empty() {
        return Some(rest);
    }
    if rest.starts_with(char::is_whitespace) {
        return Some(rest.trim_start());
    }
    None
}

fn parse_command(rest: &str) -> Result<(&str, Option<Value>)> {
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        bail!("usage: /cmd <name> [json-args]");
    }
    if args.is_empty() {
        return Ok((name, None));
    }
    let args = serde_json::from_str(args)
        .with_context(|| format!("invalid JSON arguments for command '{name}'"))?;
    Ok((name, Some(args)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::{MockCommandPort, MockConsolePort};
    use serde_json::json;

    fn service(console: Option<MockConsolePort>, command: MockCommandPort) -> PanelCommandService {
        PanelCommandService::new(
            console.map(|c| Arc::new(c) as Arc<dyn ConsolePort>),
            Arc::new(command),
        )
    }

    #[tokio::test]
    async fn test_cmd_with_json_args() {
        let mut command = MockCommandPort::new();
        command
            .expect_send_command()
            .withf(|name, args| name == "seek" && *args == Some(json!({ "t": 1.5 })))
            .times(1)
            .returning(|_, _| true);

        let svc = service(None, command);
        let reply = svc.handle(r#"/cmd seek {"t":1.5}"#).await.unwrap();
        assert_eq!(reply, PanelReply::Sent { delivered: true });
    }

    #[tokio::test]
    async fn test_cmd_without_args() {
        let mut command = MockCommandPort::new();
        command
            .expect_send_command()
            .withf(|name, args| name == "pause" && args.is_none())
            .times(1)
            .returning(|_, _| false);

        let svc = service(None, command);
        let reply = svc.handle("/cmd pause").await.unwrap();
        assert_eq!(reply, PanelReply::Sent { delivered: false });
    }

    #[tokio::test]
    async fn test_cmd_with_bad_json_sends_nothing() {
        let mut command = MockCommandPort::new();
        command.expect_send_command().never();

        let svc = service(None, command);
        let err = svc.handle("/cmd seek {oops").await.unwrap_err();
        assert!(err.to_string().contains("seek"));
    }

    #[tokio::test]
    async fn test_cmd_without_name_is_usage_error() {
        let mut command = MockCommandPort::new();
        command.expect_send_command().never();

        let svc = service(None, command);
        assert!(svc.handle("/cmd").await.is_err());
    }

    #[tokio::test]
    async fn test_json_passthrough() {
        let mut command = MockCommandPort::new();
        command
            .expect_send_json()
            .withf(|value| *value == json!({ "type": "ping" }))
            .times(1)
            .returning(|_| true);

        let svc = service(None, command);
        let reply = svc.handle(r#"/json {"type":"ping"}"#).await.unwrap();
        assert_eq!(reply, PanelReply::Sent { delivered: true });
    }

    #[tokio::test]
    async fn test_plain_text_goes_to_console_untrimmed() {
        let mut console = MockConsolePort::new();
        console
            .expect_send_line()
            .withf(|line| line == "  list actors")
            .times(1)
            .returning(|_| true);

        let svc = service(Some(console), MockCommandPort::new());
        let reply = svc.handle("  list actors").await.unwrap();
        assert_eq!(reply, PanelReply::Sent { delivered: true });
    }

    #[tokio::test]
    async fn test_similar_prefix_is_console_text() {
        let mut console = MockConsolePort::new();
        console
            .expect_send_line()
            .withf(|line| line == "/cmdlist")
            .times(1)
            .returning(|_| true);

        let svc = service(Some(console), MockCommandPort::new());
        assert!(svc.handle("/cmdlist").await.is_ok());
    }

    #[tokio::test]
    async fn test_plain_text_without_console_is_an_error() {
        let svc = service(None, MockCommandPort::new());
        assert!(svc.handle("stat fps").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_drive_both_ports() {
        let mut console = MockConsolePort::new();
        console.expect_connect().times(1).returning(|| true);
        console
            .expect_disconnect()
            .withf(|raise| *raise)
            .times(1)
            .returning(|_| ());
        let mut command = MockCommandPort::new();
        command.expect_connect().times(1).returning(|| false);
        command.expect_disconnect().times(1).returning(|| ());

        let svc = service(Some(console), command);

        let reply = svc.handle("/connect").await.unwrap();
        assert_eq!(
            reply,
            PanelReply::Connected {
                console: Some(true),
                command: false
            }
        );
        assert!(!svc.is_held_down());

        assert_eq!(svc.handle("/disconnect").await.unwrap(), PanelReply::Disconnected);
        assert!(svc.is_held_down());
    }

    #[tokio::test]
    async fn test_status_reports_both_states() {
        let mut command = MockCommandPort::new();
        command
            .expect_state()
            .returning(|| LifecycleState::Connected);

        let svc = service(None, command);
        let reply = svc.handle("/status").await.unwrap();
        assert_eq!(
            reply,
            PanelReply::Status {
                console: None,
                command: LifecycleState::Connected
            }
        );
        assert_eq!(reply.to_string(), "console not configured, command connected");
    }

    #[tokio::test]
    async fn test_shutdown_disposes_both() {
        let mut console = MockConsolePort::new();
        console.expect_dispose().times(1).returning(|| ());
        let mut command = MockCommandPort::new();
        command.expect_dispose().times(1).returning(|| ());

        let svc = service(Some(console), command);
        svc.shutdown().await;
        assert!(svc.is_held_down());
    }
}
