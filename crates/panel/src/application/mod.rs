//! Application layer - operator-facing orchestration over the ports.

pub mod services;
