//! Outbound ports - the engine connections the panel drives.
//!
//! Application services depend on these traits only, so they can be tested
//! against mocks instead of live sockets.

pub mod command_port;
pub mod console_port;

pub use command_port::CommandPort;
pub use console_port::ConsolePort;

#[cfg(any(test, feature = "testing"))]
pub use command_port::MockCommandPort;
#[cfg(any(test, feature = "testing"))]
pub use console_port::MockConsolePort;
