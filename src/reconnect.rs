//! Reconnection Coordinator.
//!
//! Replaces a failed connection with a fresh one, retrying with backoff
//! until it succeeds or the run is stopped. Both pump loops report failures
//! here; a single atomic flag guarantees that only one recovery runs at a
//! time, and failures reported against a connection that has already been
//! replaced are ignored.
//!
//! ```text
//!   Stable ──I/O failure──► Reconnecting ──connected──► Stable
//!                               │  ▲
//!                               └──┘ connect failed: wait delay(attempt)
//! ```
//!
//! The engine's `on_reconnected` runs before the new connection is
//! installed, so it always precedes the first send on that connection.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::connection::{CloseReason, Closed, Connection, ConnectionState};
use crate::engine::Engine;
use crate::link::Link;
use crate::subscription::LinkEvent;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// Connection healthy (or none installed).
    Stable,
    /// A recovery sequence is running.
    Reconnecting,
    /// Reserved. Retries are unbounded, so this state is never entered.
    Failed,
}

/// How a call to [`recover`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    /// A replacement connection is installed.
    Reconnected,
    /// Another caller is already recovering.
    InProgress,
    /// The reported connection was already replaced.
    Stale,
    /// The run was stopped before a replacement was installed.
    Stopped,
}

/// Single-flight guard plus attempt counter.
#[derive(Debug)]
pub(crate) struct ReconnectCoordinator {
    active: AtomicBool,
    attempts: AtomicU32,
    backoff: BackoffPolicy,
}

impl ReconnectCoordinator {
    pub(crate) fn new(backoff: BackoffPolicy) -> Self {
        Self {
            active: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            backoff,
        }
    }

    pub(crate) fn state(&self) -> ReconnectState {
        if self.is_reconnecting() {
            ReconnectState::Reconnecting
        } else {
            ReconnectState::Stable
        }
    }

    pub(crate) fn is_reconnecting(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Failed attempts since the last successful connect.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Claim the recovery slot. Returns false if it is already taken.
    pub(crate) fn try_begin(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::Release);
    }
}

/// Replace `failed` with a fresh connection.
///
/// Returns immediately if another recovery is running, if `failed` is no
/// longer the installed connection, or if `stop` has fired. Otherwise
/// loops until connected or stopped.
pub(crate) async fn recover(
    link: &Link,
    failed: &Arc<Connection>,
    engine: &dyn Engine,
    stop: &CancellationToken,
) -> Recovery {
    if stop.is_cancelled() {
        return Recovery::Stopped;
    }

    let coordinator = &link.coordinator;
    if !coordinator.try_begin() {
        log::debug!("Reconnect already in progress");
        return Recovery::InProgress;
    }

    // Checked after claiming the flag: a recovery that finished between the
    // failure and this call has already installed a replacement.
    if !link.is_current(failed) {
        log::debug!("Ignoring failure on replaced connection {}", failed.id());
        coordinator.finish();
        return Recovery::Stale;
    }

    let Some(address) = link.address() else {
        log::error!("No target address retained; cannot reconnect");
        coordinator.finish();
        return Recovery::Stopped;
    };

    if failed.state() != ConnectionState::Aborted {
        match failed
            .close(CloseReason::GoingAway, link.config.close_timeout())
            .await
        {
            Ok(Closed::Graceful | Closed::AlreadyClosed) => {}
            Err(e) => log::debug!("Closing stale connection {} failed: {e}", failed.id()),
        }
    }

    let outcome = loop {
        if stop.is_cancelled() {
            break Recovery::Stopped;
        }

        let attempt = coordinator.attempts();
        let result = tokio::select! {
            biased;
            () = stop.cancelled() => break Recovery::Stopped,
            result = link.connect(&address) => result,
        };

        match result {
            Ok(connection) => {
                if stop.is_cancelled() {
                    // Errors are irrelevant; the run is over.
                    let _ = connection
                        .close(CloseReason::Normal, link.config.close_timeout())
                        .await;
                    break Recovery::Stopped;
                }

                engine.on_reconnected();
                let id = connection.id();
                link.install(Arc::new(connection));
                coordinator.reset_attempts();
                log::info!("Reconnected to {address} (connection {id})");
                break Recovery::Reconnected;
            }
            Err(e) => {
                let wait = coordinator.backoff.delay(attempt);
                coordinator.attempts.fetch_add(1, Ordering::AcqRel);
                log::warn!(
                    "Reconnect failed: {e}. Attempting to reconnect. attempt={attempt} wait={}ms",
                    wait.as_millis()
                );
                link.events.emit(&LinkEvent::Reconnecting {
                    attempt,
                    retry_in: wait,
                });

                tokio::select! {
                    biased;
                    () = stop.cancelled() => break Recovery::Stopped,
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }
    };

    coordinator.finish();
    if outcome == Recovery::Reconnected {
        link.events.emit(&LinkEvent::Reconnected);
    } else {
        log::info!("Reconnect abandoned: transport stopping");
    }
    outcome
}
