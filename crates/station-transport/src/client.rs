//! WebSocket client link to the Central System

use crate::{TransportConfig, TransportError, TransportResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tungstenite::Message;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Established link to the Central System
pub struct CsLink {
    stream: WsStream,
    negotiated: Option<String>,
}

impl CsLink {
    /// Subprotocol the server selected during the handshake
    pub fn negotiated_subprotocol(&self) -> Option<&str> {
        self.negotiated.as_deref()
    }

    /// Split into independent send and receive halves
    pub fn split(self) -> (LinkSink, LinkStream) {
        let (sink, stream) = self.stream.split();
        (LinkSink { sink }, LinkStream { stream })
    }
}

/// Connect to the Central System, offering the configured subprotocols.
///
/// A server that selects a protocol outside the offered list (or selects
/// none at all) aborts the connect.
pub async fn connect(endpoint: &str, config: &TransportConfig) -> TransportResult<CsLink> {
    let url = Url::parse(endpoint)?;
    info!("Connecting to Central System: {}", url);

    let mut request = endpoint
        .into_client_request()
        .map_err(TransportError::WebSocket)?;
    let offer = config.subprotocols.join(", ");
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_str(&offer).map_err(|e| TransportError::Handshake {
            message: e.to_string(),
        })?,
    );

    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_message_size),
        ..Default::default()
    };

    let (stream, response) = timeout(
        config.connect_timeout,
        connect_async_with_config(request, Some(ws_config), false),
    )
    .await
    .map_err(|_| TransportError::Timeout {
        seconds: config.connect_timeout.as_secs(),
    })??;

    let negotiated = response
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    match negotiated.as_deref() {
        Some(selected) if config.subprotocols.iter().any(|p| p == selected) => {
            info!("WebSocket connection established ({selected})");
        }
        Some(selected) => {
            return Err(TransportError::Subprotocol {
                selected: selected.to_string(),
            });
        }
        None => {
            return Err(TransportError::Subprotocol {
                selected: "<none>".to_string(),
            });
        }
    }

    Ok(CsLink { stream, negotiated })
}

/// Send half of the link; the engine serializes access to it
pub struct LinkSink {
    sink: SplitSink<WsStream, Message>,
}

impl LinkSink {
    /// Send one text frame
    pub async fn send_text(&mut self, text: String) -> TransportResult<()> {
        debug!("Sending WebSocket message: {} bytes", text.len());
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(TransportError::from)
    }

    /// Close the link with an explicit close code
    pub async fn close(&mut self, code: u16, reason: &str) -> TransportResult<()> {
        info!("Closing WebSocket connection (code {code})");
        self.sink
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            })))
            .await
            .map_err(TransportError::from)
    }
}

/// Inbound item surfaced to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Text frame carrying an OCPP message
    Text(String),
    /// Peer closed the link
    Closed { code: Option<u16>, reason: String },
}

/// Receive half of the link
pub struct LinkStream {
    stream: SplitStream<WsStream>,
}

impl LinkStream {
    /// Next protocol-relevant event; control frames are handled internally
    /// (tungstenite queues the pong reply for pings on its own).
    pub async fn next_event(&mut self) -> Option<TransportResult<LinkEvent>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    debug!("Received WebSocket message: {} bytes", text.len());
                    return Some(Ok(LinkEvent::Text(text)));
                }
                Ok(Message::Binary(data)) => {
                    warn!("Dropping unexpected binary message: {} bytes", data.len());
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    info!("Received close frame: code={code:?} reason={reason:?}");
                    return Some(Ok(LinkEvent::Closed { code, reason }));
                }
                Ok(other) => {
                    debug!("Ignoring frame: {other:?}");
                }
                Err(e) => return Some(Err(TransportError::from(e))),
            }
        }
    }
}
