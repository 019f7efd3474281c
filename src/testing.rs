//! In-memory backend and engine for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::TransportConfig;
use crate::connection::{
    CloseReason, Connector, Fragment, FrameSink, FrameSource, SessionHalves, TargetAddress,
};
use crate::engine::Engine;
use crate::error::{CloseError, ConnectError, ReceiveError, SendError};

/// Configuration with every interval shrunk to milliseconds.
pub(crate) fn fast_config() -> TransportConfig {
    TransportConfig {
        connect_timeout_ms: 200,
        close_timeout_ms: 200,
        send_timeout_ms: 200,
        poll_interval_ms: 10,
        join_timeout_ms: 1_000,
        backoff_base_ms: 5,
        backoff_cap_ms: 50,
        ..TransportConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Ordered record of what the backend and engine observed.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

// ============================================================================
// Scripted connector
// ============================================================================

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectOutcome {
    Accept,
    Refuse,
    Hang,
}

#[derive(Default)]
struct ConnectorInner {
    script: Mutex<VecDeque<ConnectOutcome>>,
    sessions: Mutex<Vec<MockSession>>,
    connects: AtomicUsize,
    dialed: Mutex<Vec<String>>,
    log: EventLog,
}

/// Connector whose outcomes are queued by the test. Accepts once the
/// script runs out.
#[derive(Clone, Default)]
pub(crate) struct ScriptedConnector {
    inner: Arc<ConnectorInner>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.inner.script.lock().unwrap().extend(outcomes);
    }

    /// Connect attempts so far, successful or not.
    pub(crate) fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Addresses passed to every connect attempt, in order.
    pub(crate) fn dialed(&self) -> Vec<String> {
        self.inner.dialed.lock().unwrap().clone()
    }

    /// Accepted session number `index` (0-based).
    pub(crate) fn session(&self, index: usize) -> MockSession {
        self.inner.sessions.lock().unwrap()[index].clone()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }

    pub(crate) fn log(&self) -> EventLog {
        self.inner.log.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, address: &TargetAddress) -> Result<SessionHalves, ConnectError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.dialed.lock().unwrap().push(address.to_string());
        let outcome = self
            .inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);

        match outcome {
            ConnectOutcome::Accept => {
                let (session, source) = {
                    let mut sessions = self.inner.sessions.lock().unwrap();
                    let (session, source) = MockSession::new(sessions.len(), self.inner.log.clone());
                    sessions.push(session.clone());
                    (session, source)
                };
                self.inner.log.push(format!("connect:{}", session.inner.id));
                Ok((Box::new(MockSink { session }), Box::new(source)))
            }
            ConnectOutcome::Refuse => Err(ConnectError::Refused("scripted refusal".into())),
            ConnectOutcome::Hang => std::future::pending().await,
        }
    }
}

// ============================================================================
// Mock session
// ============================================================================

type Feed = Option<Result<Fragment, ReceiveError>>;

struct SessionInner {
    id: usize,
    sent: Mutex<Vec<String>>,
    close_codes: Mutex<Vec<u16>>,
    send_count: AtomicUsize,
    fail_send_at: Mutex<Option<usize>>,
    feed: mpsc::UnboundedSender<Feed>,
    log: EventLog,
}

/// Test-side view of one accepted session.
#[derive(Clone)]
pub(crate) struct MockSession {
    inner: Arc<SessionInner>,
}

impl MockSession {
    fn new(id: usize, log: EventLog) -> (Self, MockSource) {
        let (feed, rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(SessionInner {
                id,
                sent: Mutex::new(Vec::new()),
                close_codes: Mutex::new(Vec::new()),
                send_count: AtomicUsize::new(0),
                fail_send_at: Mutex::new(None),
                feed,
                log,
            }),
        };
        (session, MockSource { rx })
    }

    /// Deliver one fragment to the reader.
    pub(crate) fn feed(&self, fragment: Fragment) {
        let _ = self.inner.feed.send(Some(Ok(fragment)));
    }

    /// Make the next read fail.
    pub(crate) fn feed_error(&self, error: ReceiveError) {
        let _ = self.inner.feed.send(Some(Err(error)));
    }

    /// End the inbound stream.
    pub(crate) fn end(&self) {
        let _ = self.inner.feed.send(None);
    }

    /// Fail send number `index` (0-based, counted per session).
    pub(crate) fn fail_send_at(&self, index: usize) {
        *self.inner.fail_send_at.lock().unwrap() = Some(index);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.inner.sent.lock().unwrap().clone()
    }

    pub(crate) fn close_codes(&self) -> Vec<u16> {
        self.inner.close_codes.lock().unwrap().clone()
    }
}

struct MockSink {
    session: MockSession,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<(), SendError> {
        let inner = &self.session.inner;
        let index = inner.send_count.fetch_add(1, Ordering::SeqCst);
        if *inner.fail_send_at.lock().unwrap() == Some(index) {
            inner.log.push(format!("send-failed:{}:{text}", inner.id));
            return Err(SendError::PeerReset("scripted reset".into()));
        }
        inner.log.push(format!("send:{}:{text}", inner.id));
        inner.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), CloseError> {
        let inner = &self.session.inner;
        inner.log.push(format!("close:{}:{}", inner.id, reason.code()));
        inner.close_codes.lock().unwrap().push(reason.code());
        Ok(())
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Feed>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_fragment(&mut self) -> Result<Option<Fragment>, ReceiveError> {
        match self.rx.recv().await {
            Some(Some(Ok(fragment))) => Ok(Some(fragment)),
            Some(Some(Err(e))) => Err(e),
            Some(None) | None => Ok(None),
        }
    }
}

// ============================================================================
// Recording engine
// ============================================================================

/// Engine that records everything it is handed.
///
/// Queued payloads are re-offered every cycle when `reoffer` is set;
/// otherwise each snapshot consumes them.
pub(crate) struct RecordingEngine {
    pending: Mutex<Vec<Bytes>>,
    reoffer: bool,
    frames: Mutex<Vec<String>>,
    reconnects: AtomicUsize,
    reject: AtomicBool,
    log: EventLog,
}

impl RecordingEngine {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            reoffer: false,
            frames: Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
            reject: AtomicBool::new(false),
            log,
        }
    }

    pub(crate) fn reoffering(log: EventLog) -> Self {
        Self {
            reoffer: true,
            ..Self::new(log)
        }
    }

    pub(crate) fn queue(&self, payload: impl Into<Bytes>) {
        self.pending.lock().unwrap().push(payload.into());
    }

    pub(crate) fn reject_frames(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub(crate) fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    pub(crate) fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Engine for RecordingEngine {
    fn outbound_payloads(&self) -> Vec<Bytes> {
        let mut pending = self.pending.lock().unwrap();
        if self.reoffer {
            pending.clone()
        } else {
            std::mem::take(&mut *pending)
        }
    }

    fn has_payloads(&self) -> bool {
        !self.pending.lock().unwrap().is_empty()
    }

    fn on_inbound_frame(&self, frame: &str) -> bool {
        self.log.push(format!("frame:{frame}"));
        self.frames.lock().unwrap().push(frame.to_string());
        !self.reject.load(Ordering::SeqCst)
    }

    fn on_reconnected(&self) {
        self.log.push("reconnected");
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn sandbox_address(&self) -> String {
        "sandbox.gateway.test/channel".to_string()
    }

    fn production_address(&self) -> String {
        "gateway.test/channel".to_string()
    }
}
