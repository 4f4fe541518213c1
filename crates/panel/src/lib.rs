//! EngineLink panel.
//!
//! Clients for the two control channels of a running engine instance: a
//! line-oriented TCP console and a JSON-over-WebSocket command endpoint.
//! Both share one lifecycle contract (connect, disconnect, dispose) and
//! publish `Connected`, `Disconnected`, `MessageReceived` and `Error`
//! notifications through an [`infrastructure::messaging::EventBus`].

pub mod application;
pub mod infrastructure;
pub mod ports;
pub mod runner;
