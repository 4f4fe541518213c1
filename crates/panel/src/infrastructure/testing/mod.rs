//! Test support shared by the client test suites.

pub mod fixtures;

pub use fixtures::{
    accept, kinds, refused_addr, tcp_peer, until, ws_peer, EventRecorder, EVENT_WAIT, QUIET_WAIT,
};
