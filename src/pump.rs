//! Duplex Pump.
//!
//! Two dedicated threads, each driving one async loop on the transport's
//! runtime:
//!
//! - **writer**: every poll interval, snapshots the engine's outbound
//!   payloads and sends them in order. A connection failure hands off to the
//!   reconnect coordinator and abandons the rest of the snapshot.
//! - **reader**: receives one frame at a time and hands it over through the
//!   configured [`FrameDispatch`] path. A failure hands off to the
//!   coordinator.
//!
//! While no usable connection exists (none open, or a reconnect underway)
//! both loops sleep one poll interval between checks. Every wait is cut
//! short by the run's stop signal.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Delivery;
use crate::connection::Connection;
use crate::constants::{JOIN_POLL_INTERVAL, THREAD_NAME_PREFIX};
use crate::engine::Engine;
use crate::error::ReceiveError;
use crate::inbound::InboundQueue;
use crate::link::Link;
use crate::reconnect;

// ============================================================================
// Delivery paths
// ============================================================================

/// Where the reader loop puts received frames.
pub(crate) enum FrameDispatch {
    /// Invoke the engine on the reader thread.
    Direct(Arc<dyn Engine>),
    /// Queue for `Transport::update` on the caller's thread.
    Queued,
}

impl FrameDispatch {
    pub(crate) fn for_delivery(delivery: Delivery, engine: &Arc<dyn Engine>) -> Self {
        match delivery {
            Delivery::Background => Self::Direct(Arc::clone(engine)),
            Delivery::MainThread => Self::Queued,
        }
    }

    fn deliver(&self, frame: String, queue: &InboundQueue) {
        match self {
            Self::Direct(engine) => {
                hand_to_engine(engine.as_ref(), &frame);
            }
            Self::Queued => queue.push(frame),
        }
    }
}

/// Hand one frame to the engine, logging a rejection.
pub(crate) fn hand_to_engine(engine: &dyn Engine, frame: &str) -> bool {
    let accepted = engine.on_inbound_frame(frame);
    if !accepted {
        log::warn!("Engine rejected inbound frame ({} bytes)", frame.len());
    }
    accepted
}

// ============================================================================
// Pump threads
// ============================================================================

/// Handles to the two loop threads of one run.
#[derive(Debug)]
pub(crate) struct Pump {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Pump {
    /// Spawn both loops against `link`, stopping on `stop`.
    pub(crate) fn start(
        link: &Arc<Link>,
        engine: &Arc<dyn Engine>,
        runtime: &tokio::runtime::Handle,
        stop: &CancellationToken,
    ) -> Result<Self> {
        let writer = {
            let link = Arc::clone(link);
            let engine = Arc::clone(engine);
            let runtime = runtime.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("{THREAD_NAME_PREFIX}-writer"))
                .spawn(move || runtime.block_on(writer_loop(&link, engine.as_ref(), &stop)))
                .context("failed to spawn writer thread")?
        };

        let dispatch = FrameDispatch::for_delivery(link.config.delivery, engine);
        let reader = {
            let link = Arc::clone(link);
            let engine = Arc::clone(engine);
            let runtime = runtime.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("{THREAD_NAME_PREFIX}-reader"))
                .spawn(move || {
                    runtime.block_on(reader_loop(&link, engine.as_ref(), &dispatch, &stop));
                })
        };

        match reader {
            Ok(reader) => Ok(Self { writer, reader }),
            Err(e) => {
                stop.cancel();
                join_with_timeout(writer, "writer", link.config.join_timeout());
                Err(e).context("failed to spawn reader thread")
            }
        }
    }

    /// Wait for both loops to exit. The stop signal must already be raised.
    pub(crate) fn join(self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        join_with_timeout(self.writer, "writer", timeout);
        join_with_timeout(
            self.reader,
            "reader",
            deadline.saturating_duration_since(Instant::now()),
        );
    }
}

/// Join `handle` if it finishes within `timeout`; otherwise log and detach.
fn join_with_timeout(handle: JoinHandle<()>, name: &str, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{name} loop did not stop within {timeout:?}; detaching");
            return;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    if handle.join().is_err() {
        log::error!("{name} loop panicked");
    }
}

/// Sleep for `duration` unless stopped first. Returns true when stopped.
async fn pause(stop: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = stop.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}

// ============================================================================
// Loops
// ============================================================================

pub(crate) async fn writer_loop(link: &Link, engine: &dyn Engine, stop: &CancellationToken) {
    log::debug!("Writer loop started");

    while !stop.is_cancelled() {
        if let Some(connection) = link.usable_connection() {
            if engine.has_payloads() {
                drain_cycle(link, &connection, engine, stop).await;
            }
        }

        if pause(stop, link.config.poll_interval()).await {
            break;
        }
    }

    log::debug!("Writer loop exited");
}

/// Send one snapshot of outbound payloads in enumeration order.
async fn drain_cycle(
    link: &Link,
    connection: &Arc<Connection>,
    engine: &dyn Engine,
    stop: &CancellationToken,
) {
    let payloads = engine.outbound_payloads();

    for (index, payload) in payloads.iter().enumerate() {
        if stop.is_cancelled() {
            return;
        }

        match connection.send(payload, link.config.send_timeout()).await {
            Ok(()) => {}
            Err(e) if !e.is_connection_failure() => {
                log::warn!("Skipping outbound payload: {e}");
            }
            Err(e) => {
                if stop.is_cancelled() {
                    return;
                }
                log::warn!(
                    "Send failed on connection {}: {e}; abandoning {} payload(s) of this cycle",
                    connection.id(),
                    payloads.len() - index
                );
                reconnect::recover(link, connection, engine, stop).await;
                return;
            }
        }
    }
}

pub(crate) async fn reader_loop(
    link: &Link,
    engine: &dyn Engine,
    dispatch: &FrameDispatch,
    stop: &CancellationToken,
) {
    log::debug!("Reader loop started");

    while !stop.is_cancelled() {
        let Some(connection) = link.usable_connection() else {
            if pause(stop, link.config.poll_interval()).await {
                break;
            }
            continue;
        };

        let received = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            received = connection.receive(None) => received,
        };

        match received {
            Ok(frame) => dispatch.deliver(frame, &link.inbound),
            Err(e) => {
                if stop.is_cancelled() {
                    break;
                }
                if e != ReceiveError::Cancelled {
                    log::warn!("Receive failed on connection {}: {e}", connection.id());
                }
                reconnect::recover(link, &connection, engine, stop).await;
            }
        }
    }

    log::debug!("Reader loop exited");
}
