//! Console (line protocol) client for the engine's TCP console.

mod adapter;
mod client;

pub use client::{ConsoleClient, ConsoleClientConfig};
