//! Connection lifecycle management.
//!
//! Both protocol clients follow the same lifecycle:
//!
//! `Idle` → `Connecting` → `Connected` → `Disconnecting` → `Idle`, with
//! `Disposed` reachable from anywhere and never left again.
//!
//! [`ConnectionSlot`] owns the one live [`Connection`] of a client. Every
//! connect cycle gets a fresh id and a fresh [`CancellationToken`]. Teardown
//! starts by *taking* the connection out of the slot, so when two teardowns
//! race (receive loop fault vs. caller disconnect) exactly one of them gets
//! the resources and the other is a no-op.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::error::ClientError;

/// Observable lifecycle state of a protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No transport
    Idle,
    /// Transport construction or handshake in flight
    Connecting,
    /// Handshake complete, receive loop running
    Connected,
    /// Teardown in progress
    Disconnecting,
    /// Permanently unusable
    Disposed,
}

impl LifecycleState {
    pub fn is_connected(self) -> bool {
        self == LifecycleState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Connected => "connected",
            LifecycleState::Disconnecting => "disconnecting",
            LifecycleState::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connect cycle. Never reused across reconnects.
pub(crate) struct Connection<T> {
    pub id: u64,
    pub cancel: CancellationToken,
    /// Write-side transport handle, present once established.
    pub transport: Option<T>,
    pub receive_task: Option<JoinHandle<()>>,
    /// Set once the Connected notification has fired.
    pub established: bool,
}

/// Which connection a teardown may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeardownScope {
    /// Whatever is current (caller-initiated).
    Current,
    /// Only this connection id. A stale receive loop must not tear down a
    /// newer connection.
    Only(u64),
}

/// A connection taken out of the slot for teardown.
///
/// While the guard lives the slot reports `Disconnecting`; dropping it
/// releases that count on every exit path.
pub(crate) struct TeardownGuard<'a, T> {
    slot: &'a ConnectionSlot<T>,
    connection: Connection<T>,
}

impl<T> std::ops::Deref for TeardownGuard<'_, T> {
    type Target = Connection<T>;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<T> std::ops::DerefMut for TeardownGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl<T> Drop for TeardownGuard<'_, T> {
    fn drop(&mut self) {
        // Cancellation is idempotent; make sure nothing outlives teardown.
        self.connection.cancel.cancel();
        if self.slot.teardowns.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.slot.drained.notify_waiters();
        }
    }
}

/// Result of [`ConnectionSlot::begin`].
pub(crate) struct Started<'a, T> {
    pub id: u64,
    pub cancel: CancellationToken,
    /// Previous connection, to be torn down silently by the caller.
    pub displaced: Option<TeardownGuard<'a, T>>,
}

struct Current<T> {
    connection: Option<Connection<T>>,
    disposed: bool,
}

/// Exclusive owner of a client's live connection.
pub(crate) struct ConnectionSlot<T> {
    client: &'static str,
    current: Mutex<Current<T>>,
    next_id: AtomicU64,
    teardowns: AtomicUsize,
    drained: Notify,
    disposed: AtomicBool,
}

impl<T> ConnectionSlot<T> {
    pub fn new(client: &'static str) -> Self {
        Self {
            client,
            current: Mutex::new(Current {
                connection: None,
                disposed: false,
            }),
            next_id: AtomicU64::new(0),
            teardowns: AtomicUsize::new(0),
            drained: Notify::new(),
            disposed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Current<T>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self, connection: Connection<T>) -> TeardownGuard<'_, T> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        TeardownGuard {
            slot: self,
            connection,
        }
    }

    fn fresh(&self) -> Connection<T> {
        Connection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            cancel: CancellationToken::new(),
            transport: None,
            receive_task: None,
            established: false,
        }
    }

    /// Install a new connection in `Connecting` state, displacing any
    /// existing one.
    pub fn begin(&self) -> Result<Started<'_, T>, ClientError> {
        let mut current = self.lock();
        if current.disposed {
            return Err(ClientError::Disposed {
                client: self.client,
            });
        }
        let connection = self.fresh();
        let (id, cancel) = (connection.id, connection.cancel.clone());
        let displaced = current.connection.replace(connection);
        drop(current);

        Ok(Started {
            id,
            cancel,
            displaced: displaced.map(|old| self.guard(old)),
        })
    }

    /// Install a new connection only if the slot is empty.
    ///
    /// `Ok(None)` means a connection is already connected or connecting.
    pub fn begin_if_idle(&self) -> Result<Option<(u64, CancellationToken)>, ClientError> {
        let mut current = self.lock();
        if current.disposed {
            return Err(ClientError::Disposed {
                client: self.client,
            });
        }
        if current.connection.is_some() {
            return Ok(None);
        }
        let connection = self.fresh();
        let started = (connection.id, connection.cancel.clone());
        current.connection = Some(connection);
        Ok(Some(started))
    }

    /// Attach the transport and mark connection `id` established.
    ///
    /// Hands the transport back if the connection was torn down meanwhile.
    pub fn establish(&self, id: u64, transport: T) -> Result<(), T> {
        let mut current = self.lock();
        match current.connection.as_mut() {
            Some(conn) if conn.id == id && !conn.cancel.is_cancelled() => {
                conn.transport = Some(transport);
                conn.established = true;
                Ok(())
            }
            _ => Err(transport),
        }
    }

    /// Spawn the receive task for connection `id`, under the slot lock so a
    /// concurrent teardown either sees the handle or prevents the spawn.
    pub fn attach_task(&self, id: u64, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        let mut current = self.lock();
        match current.connection.as_mut() {
            Some(conn) if conn.id == id && !conn.cancel.is_cancelled() => {
                conn.receive_task = Some(spawn());
                true
            }
            _ => false,
        }
    }

    /// Take a connection out for teardown. At most one caller wins.
    pub fn take(&self, scope: TeardownScope) -> Option<TeardownGuard<'_, T>> {
        let mut current = self.lock();
        let matches = match (scope, current.connection.as_ref()) {
            (_, None) => false,
            (TeardownScope::Current, Some(_)) => true,
            (TeardownScope::Only(id), Some(conn)) => conn.id == id,
        };
        if !matches {
            return None;
        }
        let connection = current.connection.take()?;
        drop(current);
        Some(self.guard(connection))
    }

    /// Write handle and token of the established connection, if any.
    pub fn transport(&self) -> Option<(T, CancellationToken)>
    where
        T: Clone,
    {
        let current = self.lock();
        let conn = current.connection.as_ref()?;
        if !conn.established || conn.cancel.is_cancelled() {
            return None;
        }
        let transport = conn.transport.clone()?;
        Some((transport, conn.cancel.clone()))
    }

    /// True while an established connection has an open transport and a
    /// receive loop that has not exited. Computed on every call.
    pub fn is_live(&self) -> bool {
        let current = self.lock();
        current.connection.as_ref().is_some_and(|conn| {
            conn.established
                && conn.transport.is_some()
                && !conn.cancel.is_cancelled()
                && conn
                    .receive_task
                    .as_ref()
                    .map_or(true, |task| !task.is_finished())
        })
    }

    pub fn state(&self) -> LifecycleState {
        let current = self.lock();
        if current.disposed {
            return LifecycleState::Disposed;
        }
        match current.connection.as_ref() {
            Some(conn) if conn.cancel.is_cancelled() => LifecycleState::Disconnecting,
            Some(conn) if conn.established => LifecycleState::Connected,
            Some(_) => LifecycleState::Connecting,
            None if self.teardowns.load(Ordering::SeqCst) > 0 => LifecycleState::Disconnecting,
            None => LifecycleState::Idle,
        }
    }

    pub fn teardowns_in_flight(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// Mark the slot disposed. Returns false if it already was.
    pub fn dispose(&self) -> bool {
        let mut current = self.lock();
        if current.disposed {
            return false;
        }
        current.disposed = true;
        self.disposed.store(true, Ordering::SeqCst);
        true
    }

    /// Lock-free check used on the notification path.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Dispose without awaiting: cancel whatever is current and let its own
    /// task finish the teardown. Used from `Drop`.
    pub fn abandon(&self) {
        let mut current = self.lock();
        current.disposed = true;
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(conn) = current.connection.as_ref() {
            conn.cancel.cancel();
        }
    }

    /// Wait until no teardown is in flight, or `limit` elapses.
    pub async fn drained(&self, limit: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.teardowns.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }
}

/// Join a receive task, aborting it if it does not stop within `limit`.
pub(crate) async fn join_bounded(client: &'static str, mut task: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => tracing::warn!(client, error = %e, "Receive task panicked"),
        Err(_) => {
            tracing::warn!(client, ?limit, "Receive task did not stop in time, aborting");
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slot_is_idle() {
        let slot: ConnectionSlot<()> = ConnectionSlot::new("test");
        assert_eq!(slot.state(), LifecycleState::Idle);
        assert!(!slot.is_live());
        assert!(slot.transport().is_none());
    }

    #[test]
    fn test_begin_establish_take() {
        let slot: ConnectionSlot<u8> = ConnectionSlot::new("test");

        let started = slot.begin().unwrap();
        assert!(started.displaced.is_none());
        assert_eq!(slot.state(), LifecycleState::Connecting);

        slot.establish(started.id, 7).unwrap();
        assert_eq!(slot.state(), LifecycleState::Connected);
        assert!(slot.is_live());
        assert_eq!(slot.transport().map(|(t, _)| t), Some(7));

        let guard = slot.take(TeardownScope::Current).unwrap();
        assert!(guard.established);
        assert_eq!(slot.state(), LifecycleState::Disconnecting);
        assert!(slot.take(TeardownScope::Current).is_none());

        drop(guard);
        assert_eq!(slot.state(), LifecycleState::Idle);
        assert!(started.cancel.is_cancelled());
    }

    #[test]
    fn test_each_cycle_gets_fresh_token() {
        let slot: ConnectionSlot<()> = ConnectionSlot::new("test");

        let first = slot.begin().unwrap();
        let first_cancel = first.cancel.clone();
        drop(first);
        let second = slot.begin().unwrap();

        let displaced = second.displaced.as_ref().map(|d| d.id);
        assert_eq!(displaced, Some(1));
        assert_ne!(second.id, 1);
        drop(second);

        assert!(first_cancel.is_cancelled());
        let current = slot.take(TeardownScope::Current).unwrap();
        assert!(!current.cancel.is_cancelled());
    }

    #[test]
    fn test_stale_id_cannot_take_newer_connection() {
        let slot: ConnectionSlot<()> = ConnectionSlot::new("test");
        let first_id = slot.begin().unwrap().id;
        let second_id = slot.begin().unwrap().id;

        assert!(slot.take(TeardownScope::Only(first_id)).is_none());
        assert!(slot.establish(first_id, ()).is_err());
        assert!(slot.take(TeardownScope::Only(second_id)).is_some());
    }

    #[test]
    fn test_begin_if_idle_is_noop_when_occupied() {
        let slot: ConnectionSlot<()> = ConnectionSlot::new("test");
        assert!(slot.begin_if_idle().unwrap().is_some());
        assert!(slot.begin_if_idle().unwrap().is_none());
    }

    #[test]
    fn test_dispose_is_terminal() {
        let slot: ConnectionSlot<()> = ConnectionSlot::new("test");
        assert!(slot.dispose());
        assert!(!slot.dispose());
        assert_eq!(slot.state(), LifecycleState::Disposed);
        assert!(matches!(slot.begin(), Err(ClientError::Disposed { .. })));
        assert!(matches!(
            slot.begin_if_idle(),
            Err(ClientError::Disposed { .. })
        ));
    }

    #[test]
    fn test_abandon_cancels_current() {
        let slot: ConnectionSlot<()> = ConnectionSlot::new("test");
        let cancel = slot.begin().unwrap().cancel;
        slot.abandon();
        assert!(cancel.is_cancelled());
        assert!(slot.is_disposed());
    }

    #[tokio::test]
    async fn test_drained_waits_for_guard() {
        let slot: ConnectionSlot<()> = ConnectionSlot::new("test");
        slot.begin().unwrap();
        assert!(slot.drained(Duration::from_millis(10)).await);

        let guard = slot.take(TeardownScope::Current).unwrap();
        assert!(!slot.drained(Duration::from_millis(20)).await);
        drop(guard);
        assert!(slot.drained(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_join_bounded_aborts_stuck_task() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let handle = task.abort_handle();
        join_bounded("test", task, Duration::from_millis(20)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(stopped.is_ok(), "aborted task should finish");
    }
}
