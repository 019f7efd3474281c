//! Transport-wide constants.
//!
//! Centralizes the reference timeouts and intervals used by the transport.
//! Every value here is only a default: [`crate::config::TransportConfig`]
//! carries the effective values so tests can shrink them.
//!
//! # Categories
//!
//! - **Timeouts**: bounds on connect, close, send and loop joins
//! - **Polling**: drain cycle and wait-state intervals
//! - **Backoff**: reconnect delay parameters

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Per-attempt bound on establishing a connection.
///
/// Applies to the explicit `open` and to every attempt made by the
/// reconnection coordinator.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on an orderly close handshake.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on sending a single outbound payload.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `stop` waits for each pump thread to exit.
///
/// A thread that misses this bound is logged and detached; teardown
/// continues regardless.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Polling
// ============================================================================

/// Pause between writer drain cycles, and the poll interval used by both
/// loops while a reconnect is underway or no connection is open.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Granularity used when polling a pump thread for completion during join.
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Backoff
// ============================================================================

/// Base unit of the reconnect backoff (`base * (attempt^2 + 1)`).
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound on any single reconnect delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

// ============================================================================
// Wire
// ============================================================================

/// Close reason text sent with every close frame.
pub const CLOSE_REASON_TEXT: &str = "going away";

/// Name prefix for the threads owned by a transport.
pub const THREAD_NAME_PREFIX: &str = "gatelink";
