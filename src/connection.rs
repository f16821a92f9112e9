//! Lazy, single-flight connection management.
//!
//! The first [`ConnectionManager::acquire`] call starts a task that connects
//! and bootstraps. Every caller, the first one included, waits on that task
//! instead of starting its own, and all of them observe the same outcome.
//! Once ready, the collection handle is read from a `OnceLock` without
//! locking.
//!
//! ```text
//!            acquire()
//!               │
//!        ready? ├── yes ──► clone handle
//!               │
//!        lock state
//!         ├─ Idle    ──► spawn init task, then wait on its watch channel
//!         └─ Pending ──► wait on the running task's watch channel
//! ```
//!
//! The task belongs to no caller, so a caller that gives up (timeout, drop)
//! never cancels it. A failed initialization resets the state, so a later
//! `acquire` starts over. If the task dies without publishing a result,
//! waiting callers start a new one.

use crate::backend::{Connection, Connector};
use crate::bootstrap::Bootstrapper;
use crate::config::TransportOptions;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;
use tokio::sync::watch;

/// Collection handle type produced by a connector.
pub type CollectionOf<C> = <<C as Connector>::Connection as Connection>::Collection;

/// Live handles owned by one store.
pub struct Handles<C: Connector> {
    pub connection: C::Connection,
    pub collection: CollectionOf<C>,
}

type Shared<C> = Arc<Handles<C>>;
type Outcome<C> = Option<Result<Shared<C>>>;

enum InitState<C: Connector> {
    Idle,
    Pending {
        id: u64,
        rx: watch::Receiver<Outcome<C>>,
    },
}

enum Ticket<C: Connector> {
    Ready(CollectionOf<C>),
    Wait(watch::Receiver<Outcome<C>>),
}

/// Owns the connection state of one store instance.
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Connector> {
    connector: C,
    uri: String,
    options: TransportOptions,
    bootstrapper: Bootstrapper,
    ready: OnceLock<Shared<C>>,
    state: Mutex<InitState<C>>,
    next_id: AtomicU64,
    init_attempts: AtomicUsize,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        uri: impl Into<String>,
        options: TransportOptions,
        bootstrapper: Bootstrapper,
    ) -> Self {
        ConnectionManager {
            inner: Arc::new(Inner {
                connector,
                uri: uri.into(),
                options,
                bootstrapper,
                ready: OnceLock::new(),
                state: Mutex::new(InitState::Idle),
                next_id: AtomicU64::new(0),
                init_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// The connector this manager opens connections with.
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub fn bootstrapper(&self) -> &Bootstrapper {
        &self.inner.bootstrapper
    }

    /// Whether initialization has completed successfully.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.get().is_some()
    }

    /// Number of connect/bootstrap sequences started so far.
    pub fn init_attempts(&self) -> usize {
        self.inner.init_attempts.load(Ordering::SeqCst)
    }

    /// The live connection, once initialized.
    pub fn connection(&self) -> Option<&C::Connection> {
        self.inner.ready.get().map(|h| &h.connection)
    }

    /// Get the ready collection handle, initializing on first use.
    ///
    /// Must be called from within a Tokio runtime: the first call spawns the
    /// initialization task.
    ///
    /// # Errors
    /// Returns the initialization error (`ConnectionError` or `IndexError`)
    /// to every caller that waited on the failed attempt.
    pub async fn acquire(&self) -> Result<CollectionOf<C>> {
        loop {
            if let Some(handles) = self.inner.ready.get() {
                return Ok(handles.collection.clone());
            }

            let mut rx = match self.join_or_start() {
                Ticket::Ready(collection) => return Ok(collection),
                Ticket::Wait(rx) => rx,
            };

            let outcome = match rx.wait_for(Option::is_some).await {
                Ok(published) => (*published).clone(),
                Err(_) => {
                    debug!("Initialization task ended without a result, retrying");
                    continue;
                }
            };
            if let Some(result) = outcome {
                return result.map(|h| h.collection.clone());
            }
        }
    }

    fn join_or_start(&self) -> Ticket<C> {
        let mut state = self.inner.lock_state();
        if let Some(handles) = self.inner.ready.get() {
            return Ticket::Ready(handles.collection.clone());
        }
        if let InitState::Pending { rx, .. } = &*state {
            return Ticket::Wait(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        *state = InitState::Pending { id, rx: rx.clone() };
        drop(state);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(id, tx).await });
        Ticket::Wait(rx)
    }
}

impl<C: Connector> Inner<C> {
    async fn run(&self, id: u64, tx: watch::Sender<Outcome<C>>) {
        let mut guard = PendingGuard {
            inner: self,
            id,
            armed: true,
        };

        let result = self.initialize().await;
        if let Ok(handles) = &result {
            // Only the pending task sets it, so this cannot already be full.
            let _ = self.ready.set(Arc::clone(handles));
        }

        guard.release();
        // No receiver left is fine: every caller gave up.
        let _ = tx.send(Some(result));
    }

    async fn initialize(&self) -> Result<Shared<C>> {
        let attempt = self.init_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let target = redact(&self.uri);

        debug!("» Connecting to {} (attempt {})", target, attempt);

        let connection = self
            .connector
            .connect(&self.uri, &self.options)
            .await
            .map_err(|e| {
                error!("✗ Connection to {} failed: {}", target, e);
                match e {
                    Error::ConnectionError(_) => e,
                    other => Error::ConnectionError(other.to_string()),
                }
            })?;

        let collection = self
            .bootstrapper
            .ensure_collection(&connection)
            .await
            .map_err(|e| {
                error!(
                    "✗ Bootstrap of collection {} failed: {}",
                    self.bootstrapper.collection_name(),
                    e
                );
                e
            })?;

        info!(
            "✓ Cache store ready: {} collection '{}' ({:?})",
            target,
            self.bootstrapper.collection_name(),
            started.elapsed()
        );

        Ok(Arc::new(Handles {
            connection,
            collection,
        }))
    }

    fn lock_state(&self) -> MutexGuard<'_, InitState<C>> {
        // The state is a plain enum swap; a panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resets the pending state when the init task finishes or dies mid-flight.
struct PendingGuard<'a, C: Connector> {
    inner: &'a Inner<C>,
    id: u64,
    armed: bool,
}

impl<C: Connector> PendingGuard<'_, C> {
    fn release(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let mut state = self.inner.lock_state();
        if matches!(&*state, InitState::Pending { id, .. } if *id == self.id) {
            *state = InitState::Idle;
        }
    }
}

impl<C: Connector> Drop for PendingGuard<'_, C> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Strip credentials from a connection string for logging.
pub(crate) fn redact(uri: &str) -> String {
    match uri.split_once("://") {
        Some((scheme, rest)) => {
            let authority_end = rest.find('/').unwrap_or(rest.len());
            match rest[..authority_end].rfind('@') {
                Some(at) => format!("{}://***@{}", scheme, &rest[at + 1..]),
                None => uri.to_string(),
            }
        }
        None => uri.to_string(),
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::backend::InMemoryConnector;
    use crate::config::ExpiryStrategy;
    use futures::future::join_all;
    use std::time::Duration;

    fn manager(connector: InMemoryConnector) -> ConnectionManager<InMemoryConnector> {
        ConnectionManager::new(
            connector,
            "mongodb://localhost:27017/cache",
            TransportOptions::new(),
            Bootstrapper::new("cacheman", ExpiryStrategy::ExpireAtField),
        )
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("mongodb://user:pw@localhost:27017/cache"),
            "mongodb://***@localhost:27017/cache"
        );
        assert_eq!(
            redact("mongodb://localhost:27017/cache"),
            "mongodb://localhost:27017/cache"
        );
        assert_eq!(
            redact("mongodb://localhost/cache?x=a@b"),
            "mongodb://localhost/cache?x=a@b"
        );
    }

    #[tokio::test]
    async fn test_acquire_memoizes() {
        let connector = InMemoryConnector::new();
        let manager = manager(connector.clone());

        assert!(!manager.is_ready());
        manager.acquire().await.expect("first acquire");
        manager.acquire().await.expect("second acquire");

        assert!(manager.is_ready());
        assert!(manager.connection().is_some());
        assert_eq!(connector.connect_calls(), 1);
        assert_eq!(manager.init_attempts(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_flight() {
        let connector = InMemoryConnector::new();
        connector.set_connect_delay(Duration::from_millis(50));
        let manager = manager(connector.clone());

        let results = join_all((0..16).map(|_| manager.acquire())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(connector.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failure_shared_then_retry() {
        let connector = InMemoryConnector::new();
        connector.set_connect_delay(Duration::from_millis(20));
        connector.set_fail_connect(true);
        let manager = manager(connector.clone());

        let results = join_all((0..8).map(|_| manager.acquire())).await;

        assert_eq!(connector.connect_calls(), 1);
        for result in &results {
            assert!(matches!(result, Err(Error::ConnectionError(_))));
        }

        // Failure does not poison later calls
        connector.set_fail_connect(false);
        manager.acquire().await.expect("retry after failure");
        assert_eq!(connector.connect_calls(), 2);
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_restart_init() {
        let connector = InMemoryConnector::new();
        connector.set_connect_delay(Duration::from_millis(50));
        let manager = manager(connector.clone());

        // The first caller gives up mid-connect
        let cancelled = tokio::time::timeout(Duration::from_millis(10), manager.acquire()).await;
        assert!(cancelled.is_err());
        assert!(!manager.is_ready());

        manager.acquire().await.expect("init keeps running for later callers");
        assert!(manager.is_ready());
        assert_eq!(connector.connect_calls(), 1);
        assert_eq!(manager.init_attempts(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_first_caller_with_waiting_second_caller() {
        let connector = InMemoryConnector::new();
        connector.set_connect_delay(Duration::from_millis(50));
        let manager = manager(connector.clone());

        let first = tokio::time::timeout(Duration::from_millis(10), manager.acquire());
        let second = async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            manager.acquire().await
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_err());
        assert!(second.is_ok());
        assert_eq!(connector.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_index_failure_surfaces() {
        let connector = InMemoryConnector::new();
        connector.set_fail_index_creation(true);
        let manager = manager(connector.clone());

        let result = manager.acquire().await;
        assert!(matches!(result, Err(Error::IndexError(_))));
        assert!(!manager.is_ready());
    }
}
