//! Connection Handle.
//!
//! A [`Connection`] owns one live session with the gateway and exposes
//! bounded-time send, receive and close. The wire backend plugs in through
//! three seams:
//!
//! ```text
//! Connector ──connect(address)──► (FrameSink, FrameSource)
//!                                     │            │
//!                        Connection ──┤ send_text  │ next_fragment
//!                                     │ close      │   (reassembled into
//!                                     ▼            ▼    one text frame)
//! ```
//!
//! The sink and the source sit behind separate locks so the writer loop can
//! send while the reader loop is parked in `receive`. A per-connection
//! cancellation token releases a parked reader when the connection is
//! closed, aborted or the transport stops.
//!
//! # Lifecycle
//!
//! `Closed → Connecting → Open → Closing → Closed`, plus the terminal
//! `Aborted` state entered on any fatal I/O error.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_util::sync::CancellationToken;

use crate::constants::CLOSE_REASON_TEXT;
use crate::error::{CloseError, ConnectError, ReceiveError, SendError};

// ============================================================================
// Data types
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Closed,
    /// Session being established.
    Connecting,
    /// Ready for send and receive.
    Open,
    /// Orderly close in progress.
    Closing,
    /// Torn down by a fatal I/O error.
    Aborted,
}

/// Validated `ws://` or `wss://` target, resolved once per `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    uri: Uri,
}

impl TargetAddress {
    /// Parse and validate a WebSocket URI.
    pub fn parse(uri: &str) -> Result<Self, ConnectError> {
        let parsed: Uri = uri
            .parse()
            .map_err(|e| ConnectError::InvalidAddress(format!("{uri}: {e}")))?;

        match parsed.scheme_str() {
            Some("ws" | "wss") => {}
            Some(other) => {
                return Err(ConnectError::InvalidAddress(format!(
                    "{uri}: unsupported scheme {other}"
                )))
            }
            None => {
                return Err(ConnectError::InvalidAddress(format!(
                    "{uri}: missing scheme"
                )))
            }
        }

        if parsed.host().is_none_or(str::is_empty) {
            return Err(ConnectError::InvalidAddress(format!("{uri}: missing host")));
        }

        Ok(Self { uri: parsed })
    }

    /// The parsed URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl std::fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Kind of a lower-level fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// First fragment of a text message.
    Text,
    /// Follow-up fragment of the message in progress.
    Continuation,
    /// First fragment of a binary message.
    Binary,
    /// Peer close.
    Close,
}

/// One lower-level read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Fragment kind.
    pub kind: FragmentKind,
    /// Raw bytes.
    pub data: Vec<u8>,
    /// Set on the last fragment of a message.
    pub end_of_message: bool,
}

impl Fragment {
    /// Opening text fragment.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>, end_of_message: bool) -> Self {
        Self {
            kind: FragmentKind::Text,
            data: data.into(),
            end_of_message,
        }
    }

    /// Continuation fragment.
    #[must_use]
    pub fn continuation(data: impl Into<Vec<u8>>, end_of_message: bool) -> Self {
        Self {
            kind: FragmentKind::Continuation,
            data: data.into(),
            end_of_message,
        }
    }

    /// Complete binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: FragmentKind::Binary,
            data: data.into(),
            end_of_message: true,
        }
    }

    /// Peer close.
    #[must_use]
    pub fn close() -> Self {
        Self {
            kind: FragmentKind::Close,
            data: Vec::new(),
            end_of_message: true,
        }
    }
}

/// Why a connection is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Caller-initiated shutdown (1000).
    Normal,
    /// Stale connection replaced by a reconnect (1001).
    GoingAway,
}

impl CloseReason {
    /// WebSocket close code.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
        }
    }

    /// Close reason text.
    #[must_use]
    pub fn text(self) -> &'static str {
        CLOSE_REASON_TEXT
    }
}

/// Successful close outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// The close handshake was sent.
    Graceful,
    /// Nothing to do; the connection was already closed or aborted.
    AlreadyClosed,
}

// ============================================================================
// Backend seams
// ============================================================================

/// Write half produced by a [`Connector`].
#[async_trait]
pub trait FrameSink: Send {
    /// Send one complete text message.
    async fn send_text(&mut self, text: String) -> Result<(), SendError>;

    /// Send a close frame.
    async fn close(&mut self, reason: CloseReason) -> Result<(), CloseError>;
}

/// Read half produced by a [`Connector`].
#[async_trait]
pub trait FrameSource: Send {
    /// Next lower-level fragment, or `None` when the stream ended.
    ///
    /// Must be cancel-safe: [`Connection::receive`] races it against the
    /// connection's cancellation token.
    async fn next_fragment(&mut self) -> Result<Option<Fragment>, ReceiveError>;
}

/// Split halves of a freshly established session.
pub type SessionHalves = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Establishes sessions with the gateway.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session to `address`.
    ///
    /// Unbounded; [`Connection::connect`] applies the timeout.
    async fn connect(&self, address: &TargetAddress) -> Result<SessionHalves, ConnectError>;
}

// ============================================================================
// Connection
// ============================================================================

/// Read half plus the bytes of the message currently being reassembled.
///
/// The partial buffer lives here rather than in the receive future, so a
/// receive that times out mid-message resumes where it left off.
struct Reassembly {
    source: Box<dyn FrameSource>,
    partial: Vec<u8>,
    in_message: bool,
}

impl Reassembly {
    async fn next_message(&mut self) -> Result<String, ReceiveError> {
        loop {
            let Some(fragment) = self.source.next_fragment().await? else {
                return Err(ReceiveError::ConnectionClosed);
            };

            match fragment.kind {
                FragmentKind::Close => return Err(ReceiveError::ConnectionClosed),
                FragmentKind::Binary => {
                    self.reset();
                    return Err(ReceiveError::UnexpectedFrameType);
                }
                FragmentKind::Text => {
                    if self.in_message {
                        log::warn!(
                            "Discarding {} bytes of an unterminated message",
                            self.partial.len()
                        );
                    }
                    self.partial.clear();
                    self.in_message = true;
                }
                FragmentKind::Continuation => {
                    if !self.in_message {
                        return Err(ReceiveError::UnexpectedFrameType);
                    }
                }
            }

            self.partial.extend_from_slice(&fragment.data);

            if fragment.end_of_message {
                self.in_message = false;
                let bytes = std::mem::take(&mut self.partial);
                return Ok(String::from_utf8(bytes)
                    .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()));
            }
        }
    }

    fn reset(&mut self) {
        self.partial.clear();
        self.in_message = false;
    }
}

/// One live session with the gateway.
pub struct Connection {
    id: u64,
    address: TargetAddress,
    state: Mutex<ConnectionState>,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    reader: tokio::sync::Mutex<Reassembly>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Establish a session, failing with [`ConnectError::Timeout`] if it
    /// takes longer than `timeout`.
    ///
    /// `cancel` becomes the connection's cancellation signal. It fires on
    /// `close` or abort and releases any parked receiver. It must not be tied
    /// to a run's stop token: a connection outlives the run that was active
    /// when it opened.
    pub async fn connect(
        id: u64,
        connector: &dyn Connector,
        address: &TargetAddress,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, ConnectError> {
        log::debug!("Connecting to {address} (connection {id})");

        let (sink, source) = match tokio::time::timeout(timeout, connector.connect(address)).await
        {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ConnectError::Timeout),
        };

        log::info!("Connected to {address} (connection {id})");

        Ok(Self {
            id,
            address: address.clone(),
            state: Mutex::new(ConnectionState::Open),
            sink: tokio::sync::Mutex::new(Some(sink)),
            reader: tokio::sync::Mutex::new(Reassembly {
                source,
                partial: Vec::new(),
                in_message: false,
            }),
            cancel,
        })
    }

    /// Identifier unique within one transport instance.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address this connection was opened against.
    #[must_use]
    pub fn address(&self) -> &TargetAddress {
        &self.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state lock poisoned")
    }

    /// Whether send and receive may be attempted.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().expect("connection state lock poisoned") = next;
    }

    /// Mark the connection dead after a fatal I/O error and release any
    /// parked receiver. Closed connections stay closed.
    pub(crate) fn abort(&self) {
        {
            let mut state = self.state.lock().expect("connection state lock poisoned");
            if *state != ConnectionState::Closed {
                *state = ConnectionState::Aborted;
            }
        }
        self.cancel.cancel();
    }

    /// Send one payload as a text frame.
    pub async fn send(&self, payload: &[u8], timeout: Duration) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotConnected);
        }

        let text = std::str::from_utf8(payload)
            .map_err(|e| SendError::InvalidPayload(e.to_string()))?
            .to_owned();

        let outcome = tokio::time::timeout(timeout, async {
            let mut guard = self.sink.lock().await;
            let sink = guard.as_mut().ok_or(SendError::NotConnected)?;
            sink.send_text(text).await
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(SendError::NotConnected)) => Err(SendError::NotConnected),
            Ok(Err(e)) => {
                self.abort();
                Err(e)
            }
            Err(_) => {
                self.abort();
                Err(SendError::Timeout)
            }
        }
    }

    /// Wait for one complete text message.
    ///
    /// Fragments are concatenated until the end-of-message marker. `None`
    /// waits indefinitely; the wait always ends early when the connection's
    /// cancellation signal fires.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<String, ReceiveError> {
        match self.state() {
            ConnectionState::Open => {}
            ConnectionState::Aborted if self.cancel.is_cancelled() => {
                return Err(ReceiveError::Cancelled)
            }
            _ => return Err(ReceiveError::ConnectionClosed),
        }

        let bounded = async {
            let mut reader = self.reader.lock().await;
            match timeout {
                Some(limit) => tokio::time::timeout(limit, reader.next_message())
                    .await
                    .unwrap_or(Err(ReceiveError::Timeout)),
                None => reader.next_message().await,
            }
        };

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ReceiveError::Cancelled),
            result = bounded => result,
        };

        match &result {
            Err(ReceiveError::ConnectionClosed) => {
                log::info!("Connection {} closed by peer", self.id);
                let mut state = self.state.lock().expect("connection state lock poisoned");
                if *state == ConnectionState::Open {
                    *state = ConnectionState::Closed;
                }
            }
            Err(ReceiveError::UnexpectedFrameType | ReceiveError::Io(_)) => self.abort(),
            _ => {}
        }

        result
    }

    /// Close the connection. Idempotent.
    ///
    /// Closing a connection that is already closed, closing or aborted
    /// succeeds with [`Closed::AlreadyClosed`] without touching the wire.
    pub async fn close(&self, reason: CloseReason, timeout: Duration) -> Result<Closed, CloseError> {
        {
            let mut state = self.state.lock().expect("connection state lock poisoned");
            let current = *state;
            match current {
                ConnectionState::Open | ConnectionState::Connecting => {
                    *state = ConnectionState::Closing;
                }
                ConnectionState::Closed | ConnectionState::Closing | ConnectionState::Aborted => {
                    drop(state);
                    self.cancel.cancel();
                    return Ok(Closed::AlreadyClosed);
                }
            }
        }

        let outcome = tokio::time::timeout(timeout, async {
            let mut guard = self.sink.lock().await;
            let result = match guard.as_mut() {
                Some(sink) => sink.close(reason).await,
                None => Ok(()),
            };
            guard.take();
            result
        })
        .await;

        self.cancel.cancel();
        self.set_state(ConnectionState::Closed);
        log::info!("Closed connection {} to {}", self.id, self.address);

        match outcome {
            Ok(Ok(())) => Ok(Closed::Graceful),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CloseError::Timeout),
        }
    }
}
