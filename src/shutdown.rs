use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// What a tracked connection should be doing.  Every connection starts in
/// `Run`; a graceful stop moves idle connections to `Drain` (finish the
/// current socket politely, accept no new requests on it), and an expired
/// grace period moves everything to `Force`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConnSignal {
    Run,
    Drain,
    Force,
}

struct ConnHandle {
    // requests currently being served on this connection; http2 allows
    // several at once
    inflight: usize,
    signal: watch::Sender<ConnSignal>,
}

struct ManagerInner {
    connections: HashMap<u64, ConnHandle>,
    shutdown_requested: bool,
    next_id: u64,
}

struct Shared {
    inner: Mutex<ManagerInner>,
    // signalled whenever the connection set empties during a shutdown
    idle: Notify,
    // true once the accept loop should stop taking new connections
    accept_closed: watch::Sender<bool>,
}

/// Tracks live connections and coordinates a graceful stop.
///
/// The server registers every accepted connection here and reports the
/// requests in flight on it.  [`ShutdownManager::shutdown`] then stops the
/// accept loop, asks idle connections to close, lets busy ones finish
/// within a grace period, and severs whatever remains when the period
/// expires.
///
/// The manager is a cheap-clone handle; hold a clone outside the server
/// (in a signal handler, typically) to trigger the stop.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main] async fn main() -> Result<(), anyhow::Error> {
/// use std::time::Duration;
///
/// let mut app = trellis::app();
/// let manager = app.shutdown_manager();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     let forced = manager.shutdown(Duration::from_secs(10)).await;
///     if forced {
///         log::warn!("shutdown grace period expired; connections severed");
///     }
/// });
/// app.listen("0.0.0.0:8080").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ShutdownManager {
    shared: Arc<Shared>,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        ShutdownManager::new()
    }
}

impl ShutdownManager {
    pub(crate) fn new() -> Self {
        let (accept_closed, _) = watch::channel(false);
        ShutdownManager {
            shared: Arc::new(Shared {
                inner: Mutex::new(ManagerInner {
                    connections: HashMap::new(),
                    shutdown_requested: false,
                    next_id: 0,
                }),
                idle: Notify::new(),
                accept_closed,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether a shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutdown_requested
    }

    /// The number of connections currently tracked.
    pub fn connections(&self) -> usize {
        self.lock().connections.len()
    }

    pub(crate) fn accept_closed(&self) -> watch::Receiver<bool> {
        self.shared.accept_closed.subscribe()
    }

    /// Registers a freshly-accepted connection.  Dropping the returned
    /// guard deregisters it; the receiver carries the signal the connection
    /// task should obey.
    pub(crate) fn register(&self) -> (ConnGuard, watch::Receiver<ConnSignal>) {
        let (signal, receiver) = watch::channel(ConnSignal::Run);
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.connections.insert(
            id,
            ConnHandle {
                inflight: 0,
                signal,
            },
        );
        drop(inner);
        (
            ConnGuard {
                manager: self.clone(),
                id,
            },
            receiver,
        )
    }

    pub(crate) fn request_started(&self, id: u64) {
        if let Some(conn) = self.lock().connections.get_mut(&id) {
            conn.inflight += 1;
        }
    }

    pub(crate) fn request_finished(&self, id: u64) {
        let mut inner = self.lock();
        let draining = inner.shutdown_requested;
        if let Some(conn) = inner.connections.get_mut(&id) {
            conn.inflight = conn.inflight.saturating_sub(1);
            // during a drain, a connection whose last request just finished
            // should close instead of waiting for its next request
            if draining && conn.inflight == 0 {
                let _ = conn.signal.send(ConnSignal::Drain);
            }
        }
    }

    fn deregister(&self, id: u64) {
        let mut inner = self.lock();
        inner.connections.remove(&id);
        if inner.shutdown_requested && inner.connections.is_empty() {
            self.shared.idle.notify_waiters();
        }
    }

    /// Performs a graceful stop.
    ///
    /// New connections stop being accepted immediately.  Idle connections
    /// are asked to close; connections with a request in flight get up to
    /// `grace` to finish.  Returns `false` if everything drained within the
    /// grace period, and `true` if the period expired and the remaining
    /// connections were severed.
    ///
    /// Calling this a second time only waits on the drain already in
    /// progress.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        {
            let mut inner = self.lock();
            if !inner.shutdown_requested {
                inner.shutdown_requested = true;
                let _ = self.shared.accept_closed.send(true);
                log::info!(
                    "shutdown requested; draining {} connection(s)",
                    inner.connections.len()
                );
                for conn in inner.connections.values() {
                    if conn.inflight == 0 {
                        let _ = conn.signal.send(ConnSignal::Drain);
                    }
                }
            }
            if inner.connections.is_empty() {
                return false;
            }
        }

        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        loop {
            // register for the idle notification before re-checking the
            // map, or a deregistration landing in between is lost and the
            // drain sleeps out the whole grace period
            let drained = self.shared.idle.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.lock().connections.is_empty() {
                return false;
            }
            tokio::select! {
                _ = &mut drained => {}
                _ = &mut deadline => {
                    let inner = self.lock();
                    log::warn!(
                        "shutdown grace period expired; severing {} connection(s)",
                        inner.connections.len()
                    );
                    for conn in inner.connections.values() {
                        let _ = conn.signal.send(ConnSignal::Force);
                    }
                    return true;
                }
            }
        }
    }
}

impl std::fmt::Debug for ShutdownManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ShutdownManager")
            .field("connections", &inner.connections.len())
            .field("shutdown_requested", &inner.shutdown_requested)
            .finish()
    }
}

/// Keeps one connection registered for the task driving it; dropping the
/// guard is the deregistration.
pub(crate) struct ConnGuard {
    manager: ShutdownManager,
    id: u64,
}

impl ConnGuard {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.manager.deregister(self.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_with_no_connections_is_immediate() {
        let manager = ShutdownManager::new();
        let forced = manager.shutdown(Duration::from_secs(5)).await;
        assert!(!forced);
        assert!(manager.is_shutting_down());
    }

    #[tokio::test]
    async fn test_idle_connection_is_asked_to_drain() {
        let manager = ShutdownManager::new();
        let (guard, mut signal) = manager.register();
        assert_eq!(*signal.borrow(), ConnSignal::Run);

        let waiter = manager.clone();
        let handle = tokio::spawn(async move { waiter.shutdown(Duration::from_secs(5)).await });

        signal.changed().await.unwrap();
        assert_eq!(*signal.borrow(), ConnSignal::Drain);
        drop(guard);
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_busy_connection_finishing_within_grace() {
        let manager = ShutdownManager::new();
        let (guard, _signal) = manager.register();
        manager.request_started(guard.id());

        let worker = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            worker.request_finished(guard.id());
            drop(guard);
        });

        let forced = manager.shutdown(Duration::from_millis(500)).await;
        assert!(!forced);
        assert_eq!(manager.connections(), 0);
    }

    #[tokio::test]
    async fn test_hung_connection_is_forced() {
        let manager = ShutdownManager::new();
        let (guard, mut signal) = manager.register();
        manager.request_started(guard.id());

        let forced = manager.shutdown(Duration::from_millis(50)).await;
        assert!(forced);
        signal.changed().await.unwrap();
        assert_eq!(*signal.borrow(), ConnSignal::Force);
        drop(guard);
    }

    #[tokio::test]
    async fn test_finish_during_drain_signals_close() {
        let manager = ShutdownManager::new();
        let (guard, mut signal) = manager.register();
        manager.request_started(guard.id());

        let waiter = manager.clone();
        let handle =
            tokio::spawn(async move { waiter.shutdown(Duration::from_millis(500)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.request_finished(guard.id());
        signal.changed().await.unwrap();
        assert_eq!(*signal.borrow(), ConnSignal::Drain);

        drop(guard);
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_requests_keep_connection_busy() {
        let manager = ShutdownManager::new();
        let (guard, mut signal) = manager.register();
        // two requests multiplexed on the same connection
        manager.request_started(guard.id());
        manager.request_started(guard.id());

        let waiter = manager.clone();
        let handle =
            tokio::spawn(async move { waiter.shutdown(Duration::from_millis(500)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.request_finished(guard.id());
        // one request is still active, so no drain yet
        assert!(!signal.has_changed().unwrap());
        assert_eq!(*signal.borrow(), ConnSignal::Run);

        manager.request_finished(guard.id());
        signal.changed().await.unwrap();
        assert_eq!(*signal.borrow(), ConnSignal::Drain);

        drop(guard);
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_deregistration_racing_shutdown_is_not_forced() {
        // the drain wait must observe a connection that empties the map
        // right as the wait begins, not sleep out the grace period
        for _ in 0..50 {
            let manager = ShutdownManager::new();
            let (guard, _signal) = manager.register();
            let dropper = tokio::spawn(async move { drop(guard) });
            let forced = manager.shutdown(Duration::from_millis(100)).await;
            assert!(!forced);
            dropper.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_accept_loop_signalled() {
        let manager = ShutdownManager::new();
        let mut accept = manager.accept_closed();
        assert!(!*accept.borrow());
        manager.shutdown(Duration::from_secs(1)).await;
        accept.changed().await.unwrap();
        assert!(*accept.borrow());
    }
}
