//! Infrastructure - protocol clients and the plumbing they share.

pub mod config;
pub mod console;
pub mod error;
pub mod messaging;
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::PanelConfig;
pub use error::ClientError;
