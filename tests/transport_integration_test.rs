//! Integration tests for gatelink
//!
//! These tests drive the blocking `Transport` facade against a real local
//! WebSocket gateway built on `tokio-tungstenite::accept_async`. The gateway
//! runs on its own runtime so the tests themselves stay synchronous, the way
//! a game loop would use the transport.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gatelink::{
    ConnectError, ConnectionState, Delivery, Engine, LinkEvent, Stage, Transport,
    TransportConfig,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Test gateway
// ============================================================================

/// Local gateway that greets every connection with a fixed set of frames
/// and records every text frame it receives.
struct Gateway {
    _runtime: tokio::runtime::Runtime,
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    kick: broadcast::Sender<()>,
}

impl Gateway {
    fn start(greeting: Vec<String>) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (kick, _) = broadcast::channel(4);

        runtime.spawn(accept_loop(
            listener,
            greeting,
            Arc::clone(&received),
            Arc::clone(&connections),
            kick.clone(),
        ));

        Self {
            _runtime: runtime,
            addr,
            received,
            connections,
            kick,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/socket", self.addr)
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Drop every live connection without a close handshake.
    fn kick_all(&self) {
        let _ = self.kick.send(());
    }
}

async fn accept_loop(
    listener: TcpListener,
    greeting: Vec<String>,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    kick: broadcast::Sender<()>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let mut kicked = kick.subscribe();
        let greeting = greeting.clone();
        let received = Arc::clone(&received);
        let connections = Arc::clone(&connections);

        tokio::spawn(async move {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            connections.fetch_add(1, Ordering::SeqCst);
            let (mut write, mut read) = ws.split();

            for frame in greeting {
                if write.send(Message::Text(frame)).await.is_err() {
                    return;
                }
            }

            loop {
                tokio::select! {
                    _ = kicked.recv() => return,
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => received.lock().unwrap().push(text),
                        Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                        Some(Ok(_)) => {}
                    },
                }
            }
        });
    }
}

// ============================================================================
// Test engine
// ============================================================================

#[derive(Default)]
struct CollectingEngine {
    outbox: Mutex<VecDeque<Bytes>>,
    frames: Mutex<Vec<String>>,
    reconnects: AtomicUsize,
}

impl CollectingEngine {
    fn queue(&self, payload: &str) {
        self.outbox
            .lock()
            .unwrap()
            .push_back(Bytes::copy_from_slice(payload.as_bytes()));
    }

    fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Engine for CollectingEngine {
    fn outbound_payloads(&self) -> Vec<Bytes> {
        self.outbox.lock().unwrap().drain(..).collect()
    }

    fn has_payloads(&self) -> bool {
        !self.outbox.lock().unwrap().is_empty()
    }

    fn on_inbound_frame(&self, frame: &str) -> bool {
        self.frames.lock().unwrap().push(frame.to_string());
        true
    }

    fn on_reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn sandbox_address(&self) -> String {
        "127.0.0.1:1/sandbox".to_string()
    }

    fn production_address(&self) -> String {
        "127.0.0.1:1/production".to_string()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_config() -> TransportConfig {
    TransportConfig {
        connect_timeout_ms: 300,
        close_timeout_ms: 300,
        send_timeout_ms: 300,
        poll_interval_ms: 10,
        join_timeout_ms: 1_000,
        backoff_base_ms: 10,
        backoff_cap_ms: 100,
        ..TransportConfig::default()
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn engine() -> (Arc<CollectingEngine>, Arc<dyn Engine>) {
    let engine = Arc::new(CollectingEngine::default());
    let dyn_engine: Arc<dyn Engine> = Arc::clone(&engine) as Arc<dyn Engine>;
    (engine, dyn_engine)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_open_run_exchanges_frames_in_order() {
    let greeting: Vec<String> = (0..25).map(|i| format!("hello-{i}")).collect();
    let gateway = Gateway::start(greeting.clone());
    let (engine, dyn_engine) = engine();

    let mut transport = Transport::new(fast_config()).unwrap();
    transport.open(&gateway.url()).unwrap();
    transport.run(dyn_engine).unwrap();
    assert_eq!(transport.state(), ConnectionState::Open);

    engine.queue("ping-1");
    engine.queue("ping-2");
    engine.queue("ping-3");

    assert!(wait_until(Duration::from_secs(5), || {
        transport.update(engine.as_ref());
        engine.frames().len() == greeting.len()
    }));
    assert_eq!(engine.frames(), greeting);

    assert!(wait_until(Duration::from_secs(5), || gateway.received().len() == 3));
    assert_eq!(gateway.received(), vec!["ping-1", "ping-2", "ping-3"]);

    transport.stop();
}

#[test]
fn test_background_delivery_bypasses_update() {
    let gateway = Gateway::start(vec!["direct".to_string()]);
    let (engine, dyn_engine) = engine();

    let mut config = fast_config();
    config.delivery = Delivery::Background;
    let mut transport = Transport::new(config).unwrap();
    transport.open(&gateway.url()).unwrap();
    transport.run(dyn_engine).unwrap();

    assert!(wait_until(Duration::from_secs(5), || engine.frames() == vec!["direct"]));
    assert_eq!(transport.update(engine.as_ref()), 0);
    transport.stop();
}

#[test]
fn test_stop_twice_then_reuse() {
    let gateway = Gateway::start(Vec::new());
    let (engine, dyn_engine) = engine();

    let mut transport = Transport::new(fast_config()).unwrap();
    transport.open(&gateway.url()).unwrap();
    transport.run(Arc::clone(&dyn_engine)).unwrap();

    let started = Instant::now();
    transport.stop();
    transport.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!transport.is_running());
    assert_eq!(transport.state(), ConnectionState::Closed);

    transport.open(&gateway.url()).unwrap();
    transport.run(dyn_engine).unwrap();
    engine.queue("second life");

    assert!(wait_until(Duration::from_secs(5), || gateway
        .received()
        .contains(&"second life".to_string())));
    assert_eq!(gateway.connections(), 2);
    transport.stop();
}

#[test]
fn test_reconnects_after_gateway_drops_connection() {
    let gateway = Gateway::start(vec!["welcome".to_string()]);
    let (engine, dyn_engine) = engine();

    let mut transport = Transport::new(fast_config()).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _subscription = transport.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

    transport.open(&gateway.url()).unwrap();
    transport.run(dyn_engine).unwrap();
    assert!(wait_until(Duration::from_secs(5), || gateway.connections() == 1));

    gateway.kick_all();

    assert!(wait_until(Duration::from_secs(5), || engine.reconnects() == 1));
    assert!(wait_until(Duration::from_secs(5), || gateway.connections() == 2));
    assert!(wait_until(Duration::from_secs(5), || events
        .lock()
        .unwrap()
        .contains(&LinkEvent::Reconnected)));

    engine.queue("after reconnect");
    assert!(wait_until(Duration::from_secs(5), || gateway
        .received()
        .contains(&"after reconnect".to_string())));

    assert!(wait_until(Duration::from_secs(5), || {
        transport.update(engine.as_ref());
        engine.frames() == vec!["welcome", "welcome"]
    }));
    assert_eq!(engine.reconnects(), 1);
    transport.stop();
}

#[test]
fn test_open_times_out_when_handshake_never_completes() {
    // Accepts TCP (via the kernel backlog) but never answers the upgrade.
    let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}/socket", silent.local_addr().unwrap());

    let mut transport = Transport::new(fast_config()).unwrap();
    let started = Instant::now();
    let err = transport.open(&url).unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, ConnectError::Timeout);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    drop(silent);
}

#[test]
fn test_open_refused_port_fails_fast() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut transport = Transport::new(fast_config()).unwrap();
    let err = transport
        .open(&format!("ws://127.0.0.1:{port}/socket"))
        .unwrap_err();
    assert!(
        matches!(
            err,
            ConnectError::Refused(_) | ConnectError::NetworkUnreachable(_)
        ),
        "unexpected error: {err:?}"
    );
}

#[test]
fn test_open_and_run_surfaces_connect_failure() {
    let (_engine, dyn_engine) = engine();
    let mut transport = Transport::new(fast_config()).unwrap();

    let err = transport.open_and_run(dyn_engine, Stage::Sandbox).unwrap_err();
    assert!(err.to_string().contains("sandbox"));
    assert!(!transport.is_running());
}
