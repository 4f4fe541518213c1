//! Panel configuration

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use enginelink_protocol::{DEFAULT_COMMAND_HOST, DEFAULT_COMMAND_PORT};

use crate::infrastructure::console::ConsoleClientConfig;
use crate::infrastructure::messaging::ReconnectPolicy;
use crate::infrastructure::websocket::CommandClientConfig;

/// Panel configuration loaded from environment
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Console target, if one is configured
    pub console: Option<ConsoleClientConfig>,
    /// Command endpoint target
    pub command: CommandClientConfig,
    /// Retry the command connection after unrequested disconnects
    pub reconnect: bool,
    /// Spacing and limit for those retries
    pub reconnect_policy: ReconnectPolicy,
}

impl PanelConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the value of one
    /// variable or `None` when it is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let connect_timeout = Duration::from_millis(
            lookup("ENGINELINK_CONNECT_TIMEOUT_MS")
                .unwrap_or_else(|| "5000".to_string())
                .parse()
                .context("ENGINELINK_CONNECT_TIMEOUT_MS must be a number of milliseconds")?,
        );
        let close_timeout = Duration::from_millis(
            lookup("ENGINELINK_CLOSE_TIMEOUT_MS")
                .unwrap_or_else(|| "2000".to_string())
                .parse()
                .context("ENGINELINK_CLOSE_TIMEOUT_MS must be a number of milliseconds")?,
        );
        let read_buffer_size: usize = lookup("ENGINELINK_READ_BUFFER_SIZE")
            .unwrap_or_else(|| "4096".to_string())
            .parse()
            .context("ENGINELINK_READ_BUFFER_SIZE must be a positive integer")?;
        anyhow::ensure!(
            read_buffer_size > 0,
            "ENGINELINK_READ_BUFFER_SIZE must be a positive integer"
        );

        let console = match lookup("ENGINELINK_CONSOLE_HOST") {
            Some(host) if !host.trim().is_empty() => {
                let port: u16 = lookup("ENGINELINK_CONSOLE_PORT")
                    .context("ENGINELINK_CONSOLE_PORT is required when ENGINELINK_CONSOLE_HOST is set")?
                    .parse()
                    .context("ENGINELINK_CONSOLE_PORT must be a valid port number")?;
                let mut console = ConsoleClientConfig::new(host.trim(), port);
                console.connect_timeout = connect_timeout;
                console.read_buffer_size = read_buffer_size;
                Some(console)
            }
            _ => None,
        };

        let mut command = CommandClientConfig::new(
            lookup("ENGINELINK_COMMAND_HOST").unwrap_or_else(|| DEFAULT_COMMAND_HOST.to_string()),
            match lookup("ENGINELINK_COMMAND_PORT") {
                Some(port) => port
                    .parse()
                    .context("ENGINELINK_COMMAND_PORT must be a valid port number")?,
                None => DEFAULT_COMMAND_PORT,
            },
        );
        command.connect_timeout = connect_timeout;
        command.close_timeout = close_timeout;

        let reconnect = lookup("ENGINELINK_RECONNECT")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let mut reconnect_policy = ReconnectPolicy::default();
        if let Some(attempts) = lookup("ENGINELINK_RECONNECT_MAX_ATTEMPTS") {
            reconnect_policy.max_attempts = attempts
                .parse()
                .context("ENGINELINK_RECONNECT_MAX_ATTEMPTS must be a non-negative integer")?;
        }

        Ok(Self {
            console,
            command,
            reconnect,
            reconnect_policy,
        })
    }
}
