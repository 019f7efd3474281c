//! Transport error types.
//!
//! One enum per Connection Handle operation. Pump-level code absorbs
//! [`SendError`] and [`ReceiveError`] into reconnect triggers; only
//! [`ConnectError`] from an explicit `open` reaches the caller.

/// Errors establishing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Not established within the configured bound.
    Timeout,
    /// The peer actively refused the connection.
    Refused(String),
    /// The address could not be reached.
    NetworkUnreachable(String),
    /// The target address could not be parsed.
    InvalidAddress(String),
    /// TCP connected but the protocol upgrade failed.
    Handshake(String),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Connect timed out"),
            Self::Refused(msg) => write!(f, "Connection refused: {msg}"),
            Self::NetworkUnreachable(msg) => write!(f, "Network unreachable: {msg}"),
            Self::InvalidAddress(msg) => write!(f, "Invalid address: {msg}"),
            Self::Handshake(msg) => write!(f, "Handshake failed: {msg}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Errors sending a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No open connection.
    NotConnected,
    /// The peer reset the connection mid-send.
    PeerReset(String),
    /// The send did not complete within the configured bound.
    Timeout,
    /// The payload cannot travel as a text frame.
    InvalidPayload(String),
}

impl SendError {
    /// Whether the failure says something about the connection itself.
    ///
    /// `InvalidPayload` is a property of one payload and leaves the
    /// connection usable.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        !matches!(self, Self::InvalidPayload(_))
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected"),
            Self::PeerReset(msg) => write!(f, "Peer reset: {msg}"),
            Self::Timeout => write!(f, "Send timed out"),
            Self::InvalidPayload(msg) => write!(f, "Invalid payload: {msg}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Errors receiving a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    /// The peer performed an orderly close (or the stream ended).
    ConnectionClosed,
    /// A non-text frame arrived.
    UnexpectedFrameType,
    /// The connection's cancellation signal fired.
    Cancelled,
    /// No complete frame within the requested bound.
    Timeout,
    /// Lower-level read failure.
    Io(String),
}

impl std::fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "Connection closed by peer"),
            Self::UnexpectedFrameType => write!(f, "Message type was not text"),
            Self::Cancelled => write!(f, "Receive cancelled"),
            Self::Timeout => write!(f, "Receive timed out"),
            Self::Io(msg) => write!(f, "Read error: {msg}"),
        }
    }
}

impl std::error::Error for ReceiveError {}

/// Errors closing a connection.
///
/// Closing an already-closed connection is not an error; see
/// [`crate::connection::Closed::AlreadyClosed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseError {
    /// The close handshake did not complete within the configured bound.
    Timeout,
    /// Lower-level write failure while closing.
    Io(String),
}

impl std::fmt::Display for CloseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Close timed out"),
            Self::Io(msg) => write!(f, "Close failed: {msg}"),
        }
    }
}

impl std::error::Error for CloseError {}
