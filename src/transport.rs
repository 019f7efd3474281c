//! Transport Facade.
//!
//! [`Transport`] is the blocking entry point: it owns a small tokio runtime,
//! the shared link state and the pump threads of the current run.
//!
//! ```text
//! open(uri) ──► connection installed
//! run(engine) ──► writer + reader threads
//! update(engine) ──► queued frames handed over on the caller's thread
//! stop() ──► loops joined, connection closed, instance reusable
//! ```
//!
//! All methods block the calling thread for at most their configured
//! bound. They must not be called from inside an async runtime; async
//! callers should go through `spawn_blocking`.

use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{Context, Result};
use bytes::Bytes;

use crate::config::{Delivery, Stage, TransportConfig};
use crate::connection::{CloseReason, Closed, Connection, ConnectionState, Connector, TargetAddress};
use crate::constants::THREAD_NAME_PREFIX;
use crate::engine::Engine;
use crate::error::{ConnectError, SendError};
use crate::link::Link;
use crate::pump::{hand_to_engine, Pump};
use crate::reconnect::ReconnectState;
use crate::subscription::{LinkEvent, Subscription};
use crate::ws::{to_ws_url, WsConnector};

/// Reconnecting duplex transport.
pub struct Transport {
    /// Owned runtime. Only taken when the transport is dropped.
    runtime: Option<tokio::runtime::Runtime>,
    handle: tokio::runtime::Handle,
    link: Arc<Link>,
    pump: Option<Pump>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("link", &self.link)
            .field("pump", &self.pump.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a transport backed by real WebSocket connections.
    pub fn new(config: TransportConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a transport that opens sessions through `connector`.
    pub fn with_connector(config: TransportConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("{THREAD_NAME_PREFIX}-io"))
            .enable_all()
            .build()
            .context("failed to build transport runtime")?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            link: Arc::new(Link::new(config, connector)),
            pump: None,
        })
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.link.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Resolve `uri` and connect once. Does not start the pump.
    ///
    /// `uri` may omit the scheme (`ws://` is assumed) or use `http(s)://`.
    /// Any previous run and connection are torn down first.
    pub fn open(&mut self, uri: &str) -> Result<(), ConnectError> {
        let address = TargetAddress::parse(&to_ws_url(uri))?;

        self.halt_pump();
        if let Some(previous) = self.link.take_connection() {
            self.close_quietly(&previous, CloseReason::Normal);
        }
        self.link.coordinator.reset_attempts();

        let connection = self.handle.block_on(self.link.connect(&address))?;
        log::info!("Opened {address} (connection {})", connection.id());

        self.link.set_address(Some(address));
        self.link.install(Arc::new(connection));
        self.link.events.emit(&LinkEvent::Connected);
        Ok(())
    }

    /// Open the engine's address for `stage`, then start the pump.
    ///
    /// Blocks for at most the connect timeout.
    pub fn open_and_run(&mut self, engine: Arc<dyn Engine>, stage: Stage) -> Result<()> {
        let address = resolve_address(engine.as_ref(), stage);
        log::info!("Resolved {stage} address: {address}");
        self.open(&address)
            .with_context(|| format!("failed to open {stage} address {address}"))?;
        self.run(engine)
    }

    /// Start the pump against the open connection, tearing down any
    /// previous run first.
    pub fn run(&mut self, engine: Arc<dyn Engine>) -> Result<()> {
        if self.link.current_connection().is_none() {
            anyhow::bail!("run called without an open connection");
        }

        self.halt_pump();

        let stop = self.link.stop_token();
        let pump = Pump::start(&self.link, &engine, &self.handle, &stop)?;
        self.pump = Some(pump);
        self.link.set_running(true);
        log::info!("Pump started ({:?} delivery)", self.link.config.delivery);
        Ok(())
    }

    /// Hand every queued inbound frame to `engine`, oldest first.
    ///
    /// Returns the number of frames handed over. Does nothing unless
    /// main-thread delivery is configured.
    pub fn update(&self, engine: &dyn Engine) -> usize {
        if self.link.config.delivery != Delivery::MainThread {
            return 0;
        }

        let frames = self.link.inbound.drain();
        for frame in &frames {
            hand_to_engine(engine, frame);
        }
        frames.len()
    }

    /// Send one payload outside the pump.
    ///
    /// Fails with [`SendError::NotConnected`] before `open` and while a
    /// reconnect is underway.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<(), SendError> {
        let connection = self.link.usable_connection().ok_or(SendError::NotConnected)?;
        let payload = payload.into();
        self.handle
            .block_on(connection.send(&payload, self.link.config.send_timeout()))
    }

    /// Stop the pump and close the connection. Idempotent.
    ///
    /// Afterwards the instance can be reused with a fresh `open`.
    pub fn stop(&mut self) {
        let was_active = self.pump.is_some() || self.link.current_connection().is_some();

        self.halt_pump();
        if let Some(connection) = self.link.take_connection() {
            self.close_quietly(&connection, CloseReason::Normal);
        }
        self.link.set_address(None);
        self.link.coordinator.reset_attempts();

        if was_active {
            log::info!("Transport stopped");
            self.link.events.emit(&LinkEvent::Disconnected);
        }
    }

    /// Alias for [`Transport::stop`].
    pub fn disconnect(&mut self) {
        self.stop();
    }

    /// Raise the stop signal, join the loops, and arm a fresh signal.
    fn halt_pump(&mut self) {
        self.link.signal_stop();
        if let Some(pump) = self.pump.take() {
            pump.join(self.link.config.join_timeout());
        }
        self.link.set_running(false);
        self.link.reset_stop_token();
        // A detached coordinator exits on its own cancelled token.
        self.link.coordinator.finish();
    }

    fn close_quietly(&self, connection: &Connection, reason: CloseReason) {
        match self
            .handle
            .block_on(connection.close(reason, self.link.config.close_timeout()))
        {
            Ok(Closed::Graceful) => {}
            Ok(Closed::AlreadyClosed) => {
                log::debug!("Connection {} was already closed", connection.id());
            }
            Err(e) => log::warn!("Closing connection {} failed: {e}", connection.id()),
        }
    }

    // ========================================================================
    // Observability
    // ========================================================================

    /// Register a lifecycle callback. Dropping the returned handle
    /// deregisters it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LinkEvent) + Send + Sync + 'static,
    {
        self.link.events.subscribe(callback)
    }

    /// Lifecycle state of the current connection. Reports `Connecting`
    /// while a reconnect is underway.
    pub fn state(&self) -> ConnectionState {
        if self.link.coordinator.is_reconnecting() {
            return ConnectionState::Connecting;
        }
        self.link
            .current_connection()
            .map_or(ConnectionState::Closed, |c| c.state())
    }

    /// Whether the pump loops are active.
    pub fn is_running(&self) -> bool {
        self.link.is_running()
    }

    /// Whether a reconnect sequence is underway.
    pub fn is_reconnecting(&self) -> bool {
        self.link.coordinator.is_reconnecting()
    }

    /// Reconnect coordinator state.
    pub fn reconnect_state(&self) -> ReconnectState {
        self.link.coordinator.state()
    }

    /// Failed reconnect attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.link.coordinator.attempts()
    }

    /// Frames waiting for `update`.
    pub fn pending_frames(&self) -> usize {
        self.link.inbound.len()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            log::debug!("Transport dropped inside an async context; stopping on a helper thread");
            self.teardown_detached();
            return;
        }
        self.stop();
    }
}

impl Transport {
    /// Stop without blocking the current thread.
    ///
    /// The pump join, the final close and the runtime drop all block, and
    /// none of them may happen on an async worker. They move to a helper
    /// thread instead. If that thread cannot be spawned the runtime is shut
    /// down in the background and the connection is abandoned.
    fn teardown_detached(&mut self) {
        let was_active = self.pump.is_some() || self.link.current_connection().is_some();
        self.link.signal_stop();

        let Some(runtime) = self.runtime.take() else {
            return;
        };
        let pump = self.pump.take();
        let link = Arc::clone(&self.link);
        let (runtime_tx, runtime_rx) = mpsc::channel::<tokio::runtime::Runtime>();

        let spawned = thread::Builder::new()
            .name(format!("{THREAD_NAME_PREFIX}-teardown"))
            .spawn(move || {
                if let Some(pump) = pump {
                    pump.join(link.config.join_timeout());
                }
                link.set_running(false);

                let Ok(runtime) = runtime_rx.recv() else {
                    return;
                };
                if let Some(connection) = link.take_connection() {
                    let closed = runtime.block_on(
                        connection.close(CloseReason::Normal, link.config.close_timeout()),
                    );
                    if let Err(e) = closed {
                        log::warn!("Closing connection {} failed: {e}", connection.id());
                    }
                }
                link.set_address(None);
                if was_active {
                    link.events.emit(&LinkEvent::Disconnected);
                }
            });

        match spawned {
            Ok(_) => {
                if let Err(mpsc::SendError(runtime)) = runtime_tx.send(runtime) {
                    runtime.shutdown_background();
                }
            }
            Err(e) => {
                log::warn!("Failed to spawn teardown thread: {e}");
                runtime.shutdown_background();
            }
        }
    }
}

/// Gateway address the engine reports for `stage`.
pub fn resolve_address(engine: &dyn Engine, stage: Stage) -> String {
    match stage {
        Stage::Sandbox => engine.sandbox_address(),
        Stage::Production => engine.production_address(),
    }
}
