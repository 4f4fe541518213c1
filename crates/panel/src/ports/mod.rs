//! Ports - contracts between the panel's application layer and the
//! protocol clients that talk to the engine.

pub mod outbound;
