//! Notification and lifecycle plumbing shared by both protocol clients.
//!
//! - `EventBus`: synchronous fan-out of [`ClientEvent`]s to subscribers
//! - `ConnectionSlot`: ownership of the one live connection per client
//! - `BackoffState`: reconnect spacing for supervisors

pub mod backoff;
pub mod connection;
pub mod event_bus;

pub use backoff::{BackoffState, ReconnectPolicy};
pub use connection::LifecycleState;
pub(crate) use connection::{join_bounded, ConnectionSlot, TeardownGuard, TeardownScope};
pub use event_bus::{ClientEvent, EventBus, SubscriptionId};
