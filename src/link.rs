//! State shared by the facade, both pump loops and the reconnect
//! coordinator.
//!
//! The connection slot holds at most one [`Connection`]. Only `open`, the
//! coordinator and `stop` replace it; the loops read it through
//! [`Link::usable_connection`], which yields nothing while a reconnect is
//! underway.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::connection::{Connection, Connector, TargetAddress};
use crate::error::ConnectError;
use crate::inbound::InboundQueue;
use crate::reconnect::ReconnectCoordinator;
use crate::subscription::{CallbackRegistry, LinkEvent};

/// Shared transport state.
pub(crate) struct Link {
    pub(crate) config: TransportConfig,
    connector: Arc<dyn Connector>,
    address: RwLock<Option<TargetAddress>>,
    connection: RwLock<Option<Arc<Connection>>>,
    running: AtomicBool,
    /// Stop signal for the current run. Replaced on every reset so loops
    /// left behind by a timed-out join keep seeing their own cancelled token.
    stop: Mutex<CancellationToken>,
    pub(crate) coordinator: ReconnectCoordinator,
    pub(crate) inbound: InboundQueue,
    pub(crate) events: CallbackRegistry<LinkEvent>,
    next_connection_id: AtomicU64,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("address", &self.address())
            .field("connection", &self.current_connection().map(|c| c.id()))
            .field("running", &self.is_running())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl Link {
    pub(crate) fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let coordinator = ReconnectCoordinator::new(config.backoff());
        Self {
            config,
            connector,
            address: RwLock::new(None),
            connection: RwLock::new(None),
            running: AtomicBool::new(false),
            stop: Mutex::new(CancellationToken::new()),
            coordinator,
            inbound: InboundQueue::new(),
            events: CallbackRegistry::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    // ========================================================================
    // Address
    // ========================================================================

    pub(crate) fn address(&self) -> Option<TargetAddress> {
        self.address.read().expect("address lock poisoned").clone()
    }

    pub(crate) fn set_address(&self, address: Option<TargetAddress>) {
        *self.address.write().expect("address lock poisoned") = address;
    }

    // ========================================================================
    // Connection slot
    // ========================================================================

    /// Establish a new connection to `address`, bounded by the configured
    /// connect timeout. Does not install it.
    pub(crate) async fn connect(&self, address: &TargetAddress) -> Result<Connection, ConnectError> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        Connection::connect(
            id,
            self.connector.as_ref(),
            address,
            self.config.connect_timeout(),
            CancellationToken::new(),
        )
        .await
    }

    pub(crate) fn current_connection(&self) -> Option<Arc<Connection>> {
        self.connection.read().expect("connection lock poisoned").clone()
    }

    /// Whether `connection` is the one currently installed.
    pub(crate) fn is_current(&self, connection: &Arc<Connection>) -> bool {
        self.connection
            .read()
            .expect("connection lock poisoned")
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, connection))
    }

    /// Install `connection`, returning the one it replaces.
    pub(crate) fn install(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connection
            .write()
            .expect("connection lock poisoned")
            .replace(connection)
    }

    pub(crate) fn take_connection(&self) -> Option<Arc<Connection>> {
        self.connection.write().expect("connection lock poisoned").take()
    }

    /// The connection the loops may use right now: installed, open, and not
    /// being replaced.
    pub(crate) fn usable_connection(&self) -> Option<Arc<Connection>> {
        if self.coordinator.is_reconnecting() {
            return None;
        }
        self.current_connection().filter(|c| c.is_open())
    }

    // ========================================================================
    // Run lifecycle
    // ========================================================================

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Stop signal for the current run.
    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.stop.lock().expect("stop token lock poisoned").clone()
    }

    /// Cancel the current run's stop signal.
    pub(crate) fn signal_stop(&self) {
        self.stop.lock().expect("stop token lock poisoned").cancel();
    }

    /// Install a fresh stop signal so the instance can run again.
    pub(crate) fn reset_stop_token(&self) {
        *self.stop.lock().expect("stop token lock poisoned") = CancellationToken::new();
    }
}
