//! Command (JSON over WebSocket) client for the engine's command endpoint.

mod adapter;
mod client;

pub use client::{CommandClient, CommandClientConfig};
