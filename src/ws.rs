//! WebSocket backend.
//!
//! Thin wrapper around `tokio-tungstenite` implementing the connection
//! seams ([`Connector`], [`FrameSink`], [`FrameSource`]). Nothing else in
//! the crate touches `tokio-tungstenite` directly.
//!
//! `tungstenite` reassembles continuation frames itself, so every message
//! read here surfaces as a single fragment with the end-of-message marker
//! set. Control frames (ping/pong) are answered by `tungstenite` and
//! skipped.

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::connection::{
    CloseReason, Connector, Fragment, FrameSink, FrameSource, SessionHalves, TargetAddress,
};
use crate::error::{CloseError, ConnectError, ReceiveError, SendError};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connector that dials real WebSocket endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &TargetAddress) -> Result<SessionHalves, ConnectError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(address.uri().clone())
            .await
            .map_err(|e| connect_error(&e))?;

        let (sink, stream) = ws_stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { stream })))
    }
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsSink {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), SendError> {
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    SendError::NotConnected
                }
                other => SendError::PeerReset(other.to_string()),
            })
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), CloseError> {
        let frame = CloseFrame {
            code: CloseCode::from(reason.code()),
            reason: reason.text().into(),
        };

        match self.sink.send(tungstenite::Message::Close(Some(frame))).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(CloseError::Io(e.to_string())),
        }
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsSource {
    stream: futures_util::stream::SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_fragment(&mut self) -> Result<Option<Fragment>, ReceiveError> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Ok(Some(Fragment::text(text, true)));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Ok(Some(Fragment::binary(data)));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    if let Some(cf) = close_frame {
                        log::debug!("Peer closed: code={} reason={}", u16::from(cf.code), cf.reason);
                    }
                    return Ok(Some(Fragment::close()));
                }
                Some(Ok(
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_),
                )) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => return Ok(None),
                Some(Err(e)) => return Err(ReceiveError::Io(e.to_string())),
            }
        }
    }
}

fn connect_error(error: &tungstenite::Error) -> ConnectError {
    match error {
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ConnectError::Refused(io.to_string())
        }
        tungstenite::Error::Io(io) => ConnectError::NetworkUnreachable(io.to_string()),
        tungstenite::Error::Url(e) => ConnectError::InvalidAddress(e.to_string()),
        other => ConnectError::Handshake(other.to_string()),
    }
}

/// Normalize a gateway address into a WebSocket URL.
///
/// Bare `host/path` addresses get a `ws://` prefix, `http(s)://` is mapped
/// to `ws(s)://`. Any other scheme passes through unchanged.
#[must_use]
pub fn to_ws_url(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("wss://") || address.starts_with("ws://") {
        address.to_string()
    } else if let Some(rest) = address.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = address.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if address.contains("://") {
        // Foreign scheme; left for address validation to reject.
        address.to_string()
    } else {
        format!("ws://{address}")
    }
}
