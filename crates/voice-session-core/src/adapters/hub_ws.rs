//! WebSocket transport for the agent hub
//!
//! Speaks the hub's JSON protocol: every frame is a JSON object terminated
//! by the record separator `0x1E`, and a text message may carry several
//! frames. The connection opens with a handshake naming the protocol. When
//! the socket drops, the transport reconnects on a fixed delay schedule and
//! reports `Closed` once the schedule is exhausted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::recovery::with_timeout;

use super::presence_hub::{HubTransport, HubTransportEvent};

/// Frame terminator of the hub protocol
pub const RECORD_SEPARATOR: char = '\u{1e}';

const MESSAGE_INVOCATION: u64 = 1;
const MESSAGE_COMPLETION: u64 = 3;
const MESSAGE_PING: u64 = 6;
const MESSAGE_CLOSE: u64 = 7;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;
type WsReader = SplitStream<WsStream>;

/// Handshake request sent right after the socket opens
pub fn handshake_frame() -> String {
    format!("{}{}", json!({"protocol": "json", "version": 1}), RECORD_SEPARATOR)
}

/// Encode a non-blocking invocation of `target`
pub fn encode_invocation(target: &str, arguments: &[Value]) -> String {
    format!(
        "{}{}",
        json!({"type": MESSAGE_INVOCATION, "target": target, "arguments": arguments}),
        RECORD_SEPARATOR
    )
}

fn ping_frame() -> String {
    format!("{}{}", json!({"type": MESSAGE_PING}), RECORD_SEPARATOR)
}

/// Split a text message into its frames
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR).filter(|frame| !frame.trim().is_empty())
}

/// Inbound frame, as far as the transport cares
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    Ping,
    /// Server closed the connection, optionally with an error
    Close { error: Option<String> },
    /// Invocations, completions and anything else
    Other(Option<u64>),
}

pub fn parse_frame(frame: &str) -> VoiceResult<HubFrame> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| VoiceError::network(format!("malformed hub frame: {}", e)))?;
    let kind = value.get("type").and_then(Value::as_u64);
    Ok(match kind {
        Some(MESSAGE_PING) => HubFrame::Ping,
        Some(MESSAGE_CLOSE) => HubFrame::Close {
            error: value.get("error").and_then(Value::as_str).map(str::to_string),
        },
        other => HubFrame::Other(other),
    })
}

/// Check the server's handshake response: `{}` or `{"error": "..."}`
fn check_handshake_response(text: &str) -> VoiceResult<()> {
    let frame = split_frames(text)
        .next()
        .ok_or_else(|| VoiceError::hub_connect("empty handshake response"))?;
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| VoiceError::hub_connect(format!("malformed handshake response: {}", e)))?;
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(VoiceError::hub_connect(format!("handshake rejected: {}", error))),
        None => Ok(()),
    }
}

struct SocketState {
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    closing: AtomicBool,
}

impl SocketState {
    async fn send_text(&self, text: String) -> VoiceResult<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(VoiceError::HubClosed)?;
        sink.send(WsMessage::Text(text))
            .await
            .map_err(|e| VoiceError::network(e.to_string()))
    }
}

/// tokio-tungstenite implementation of [`HubTransport`]
pub struct WebSocketHubTransport {
    url: Url,
    handshake_timeout: Duration,
    reconnect_delays: Vec<Duration>,
    state: Arc<SocketState>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketHubTransport {
    pub fn new(url: &str, handshake_timeout: Duration, reconnect_delays: Vec<Duration>) -> VoiceResult<Self> {
        let url = Url::parse(url).map_err(|e| VoiceError::InvalidConfiguration {
            field: "hub_url".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            url,
            handshake_timeout,
            reconnect_delays,
            state: Arc::new(SocketState {
                writer: tokio::sync::Mutex::new(None),
                closing: AtomicBool::new(false),
            }),
            supervisor: parking_lot::Mutex::new(None),
        })
    }

    pub fn from_config(config: &SessionConfig) -> VoiceResult<Self> {
        Self::new(&config.hub_url, config.hub_handshake_timeout(), config.hub_reconnect_delays())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Open the socket and complete the protocol handshake
async fn connect_and_handshake(url: &Url, timeout: Duration) -> VoiceResult<(WsWriter, WsReader)> {
    with_timeout("hub handshake", timeout, open_socket(url)).await
}

async fn open_socket(url: &Url) -> VoiceResult<(WsWriter, WsReader)> {
    let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| VoiceError::network(format!("websocket connect failed: {}", e)))?;
    let (mut writer, mut reader) = stream.split();

    writer
        .send(WsMessage::Text(handshake_frame()))
        .await
        .map_err(|e| VoiceError::network(e.to_string()))?;

    loop {
        match reader.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                check_handshake_response(&text)?;
                return Ok((writer, reader));
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(VoiceError::network("socket closed during handshake"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(VoiceError::network(e.to_string())),
        }
    }
}

/// Read until the connection ends; returns the reason it ended
async fn read_until_closed(state: &SocketState, mut reader: WsReader) -> Option<String> {
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + KEEPALIVE_INTERVAL,
        KEEPALIVE_INTERVAL,
    );

    loop {
        tokio::select! {
            message = reader.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    for frame in split_frames(&text) {
                        match parse_frame(frame) {
                            Ok(HubFrame::Ping) => {
                                trace!("Hub ping");
                                if let Err(e) = state.send_text(ping_frame()).await {
                                    return Some(e.to_string());
                                }
                            }
                            Ok(HubFrame::Close { error }) => {
                                debug!(error = ?error, "Hub sent close");
                                return Some(error.unwrap_or_else(|| "server closed the connection".to_string()));
                            }
                            Ok(HubFrame::Other(Some(MESSAGE_COMPLETION))) => trace!("Hub completion"),
                            Ok(HubFrame::Other(kind)) => trace!(kind = ?kind, "Ignoring hub frame"),
                            Err(e) => warn!(error = %e, "Dropping malformed hub frame"),
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => return Some("socket closed".to_string()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(e.to_string()),
            },
            _ = keepalive.tick() => {
                if let Err(e) = state.send_text(ping_frame()).await {
                    return Some(e.to_string());
                }
            }
        }
    }
}

async fn supervise(
    url: Url,
    handshake_timeout: Duration,
    reconnect_delays: Vec<Duration>,
    state: Arc<SocketState>,
    mut reader: WsReader,
    events: mpsc::UnboundedSender<HubTransportEvent>,
) {
    'connection: loop {
        let reason = read_until_closed(&state, reader).await;
        state.writer.lock().await.take();

        if state.closing.load(Ordering::SeqCst) {
            let _ = events.send(HubTransportEvent::Closed { error: None });
            return;
        }

        warn!(reason = ?reason, "Hub connection lost");
        let _ = events.send(HubTransportEvent::Reconnecting);

        let mut last_error = reason;
        for (attempt, delay) in reconnect_delays.iter().enumerate() {
            tokio::time::sleep(*delay).await;
            if state.closing.load(Ordering::SeqCst) {
                let _ = events.send(HubTransportEvent::Closed { error: None });
                return;
            }
            match connect_and_handshake(&url, handshake_timeout).await {
                Ok((writer, next_reader)) => {
                    *state.writer.lock().await = Some(writer);
                    info!(attempt = attempt + 1, "Hub reconnected");
                    let _ = events.send(HubTransportEvent::Reconnected);
                    reader = next_reader;
                    continue 'connection;
                }
                Err(e) => {
                    debug!(attempt = attempt + 1, error = %e, "Hub reconnect attempt failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let _ = events.send(HubTransportEvent::Closed { error: last_error });
        return;
    }
}

#[async_trait]
impl HubTransport for WebSocketHubTransport {
    async fn open(&self) -> VoiceResult<mpsc::UnboundedReceiver<HubTransportEvent>> {
        let (writer, reader) = connect_and_handshake(&self.url, self.handshake_timeout).await?;
        self.state.closing.store(false, Ordering::SeqCst);
        *self.state.writer.lock().await = Some(writer);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(supervise(
            self.url.clone(),
            self.handshake_timeout,
            self.reconnect_delays.clone(),
            self.state.clone(),
            reader,
            events_tx,
        ));
        if let Some(previous) = self.supervisor.lock().replace(task) {
            previous.abort();
        }

        debug!(url = %self.url, "Hub transport open");
        Ok(events_rx)
    }

    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> VoiceResult<()> {
        self.state
            .send_text(encode_invocation(target, &arguments))
            .await
            .map_err(|e| match e {
                VoiceError::HubClosed => e,
                other => VoiceError::hub_invocation(target, other.to_string()),
            })
    }

    async fn close(&self) -> VoiceResult<()> {
        self.state.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.supervisor.lock().take() {
            task.abort();
        }

        let writer = self.state.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.send(WsMessage::Close(None)).await {
                debug!(error = %e, "Failed to send close frame");
            }
            writer
                .close()
                .await
                .map_err(|e| VoiceError::network(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WebSocketHubTransport {
    fn drop(&mut self) {
        if let Some(task) = self.supervisor.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_end_with_record_separator() {
        assert_eq!(handshake_frame(), "{\"protocol\":\"json\",\"version\":1}\u{1e}");

        let frame = encode_invocation("SetAgentState", &[json!("busy")]);
        assert!(frame.ends_with(RECORD_SEPARATOR));
        let value: Value = serde_json::from_str(frame.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["target"], "SetAgentState");
        assert_eq!(value["arguments"], json!(["busy"]));
    }

    #[test]
    fn test_split_multiple_frames() {
        let text = "{\"type\":6}\u{1e}{\"type\":7,\"error\":\"bye\"}\u{1e}";
        let frames: Vec<HubFrame> = split_frames(text).map(|f| parse_frame(f).unwrap()).collect();
        assert_eq!(
            frames,
            vec![HubFrame::Ping, HubFrame::Close { error: Some("bye".to_string()) }]
        );
    }

    #[test]
    fn test_handshake_response() {
        assert!(check_handshake_response("{}\u{1e}").is_ok());
        assert!(matches!(
            check_handshake_response("{\"error\":\"unsupported protocol\"}\u{1e}"),
            Err(VoiceError::HubConnect { .. })
        ));
        assert!(check_handshake_response("").is_err());
    }

    #[tokio::test]
    async fn test_invoke_before_open_is_closed() {
        let transport =
            WebSocketHubTransport::new("ws://127.0.0.1:9/hub", Duration::from_secs(1), vec![]).unwrap();
        assert_eq!(
            transport.invoke("RegisterAgent", vec![json!("a")]).await,
            Err(VoiceError::HubClosed)
        );
    }
}
