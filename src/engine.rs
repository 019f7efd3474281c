//! Protocol engine capability.
//!
//! The engine is the external component that produces outbound payloads
//! and consumes inbound frames. The transport never interprets either; it
//! only moves bytes. Implementations are shared with the pump threads, so
//! they synchronize their own state.

use bytes::Bytes;

/// Payload producer and frame consumer driven by the transport.
pub trait Engine: Send + Sync + 'static {
    /// Snapshot of the payloads currently waiting to be sent, in order.
    ///
    /// The snapshot may be re-offered on the next cycle; the engine decides
    /// when a payload has been consumed.
    fn outbound_payloads(&self) -> Vec<Bytes>;

    /// Cheap check that skips the snapshot when nothing is pending.
    fn has_payloads(&self) -> bool {
        true
    }

    /// Hand over one inbound text frame. Returns whether the engine
    /// accepted it; rejected frames are logged and dropped.
    fn on_inbound_frame(&self, frame: &str) -> bool;

    /// Notified once per successful reconnection, before any payload is
    /// sent on the new connection.
    fn on_reconnected(&self);

    /// Gateway address for the sandbox stage.
    fn sandbox_address(&self) -> String;

    /// Gateway address for the production stage.
    fn production_address(&self) -> String;
}
