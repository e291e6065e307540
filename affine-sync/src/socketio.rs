//! Socket.IO v5 client over a raw Engine.IO v4 WebSocket.
//!
//! Only the text-frame subset the sync server uses is implemented:
//!
//! ```text
//! server → 0{"sid":…,"pingInterval":…}     engine.io open
//! client → 40 / 40{"token":…}              socket.io connect
//! server → 40{…} | 44{"message":…}         accepted | rejected
//! client → 42<id>["event",payload]         event expecting an ack
//! server → 43<id>[response]                ack
//! server → 2 / client → 3                  heartbeat
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::config::{AuthHeaders, SyncConfig};
use crate::error::TransportError;
use crate::transport::{Connector, SyncChannel};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Value),
    Disconnect,
    Event { id: Option<u64>, data: Value },
    Ack { id: u64, data: Value },
    ConnectError(Value),
}

fn protocol(message: impl Into<String>) -> TransportError {
    TransportError::Protocol(message.into())
}

fn json_body(body: &str) -> Result<Value, TransportError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| protocol(format!("invalid packet payload: {e}")))
}

impl Packet {
    pub fn parse(frame: &str) -> Result<Self, TransportError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or_else(|| protocol("empty frame"))?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(Packet::Open(json_body(rest)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '5' | '6' => Ok(Packet::Noop),
            '4' => Self::parse_message(rest),
            _ => Err(protocol(format!("unknown engine.io packet type {kind:?}"))),
        }
    }

    fn parse_message(body: &str) -> Result<Self, TransportError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or_else(|| protocol("empty socket.io packet"))?;
        let mut rest = chars.as_str();
        if rest.starts_with('/') {
            rest = rest.split_once(',').map_or("", |(_, tail)| tail);
        }
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| protocol(format!("invalid packet id: {e}")))?,
            )
        } else {
            None
        };
        let payload = &rest[digits..];

        match kind {
            '0' => Ok(Packet::Connect(json_body(payload)?)),
            '1' => Ok(Packet::Disconnect),
            '2' => Ok(Packet::Event {
                id,
                data: json_body(payload)?,
            }),
            '3' => Ok(Packet::Ack {
                id: id.ok_or_else(|| protocol("ack without id"))?,
                data: json_body(payload)?,
            }),
            '4' => Ok(Packet::ConnectError(json_body(payload)?)),
            _ => Err(protocol(format!("unsupported socket.io packet type {kind:?}"))),
        }
    }

    pub fn encode(&self) -> String {
        let with_body = |prefix: &str, body: &Value| {
            if body.is_null() {
                prefix.to_string()
            } else {
                format!("{prefix}{body}")
            }
        };
        match self {
            Packet::Open(body) => with_body("0", body),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(body) => with_body("40", body),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { id, data } => match id {
                Some(id) => format!("42{id}{data}"),
                None => format!("42{data}"),
            },
            Packet::Ack { id, data } => format!("43{id}{data}"),
            Packet::ConnectError(body) => with_body("44", body),
        }
    }
}

/// First argument of an ack, which is what the server's handler returned.
fn ack_value(data: Value) -> Value {
    match data {
        Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
        other => other,
    }
}

fn error_message(body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    closed: AtomicBool,
}

impl Shared {
    fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with a closed error.
        self.pending.lock().clear();
    }
}

/// Connects a fresh Socket.IO channel per call.
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    url: String,
    auth: AuthHeaders,
    connect_timeout: Duration,
}

impl SocketIoConnector {
    pub fn new(url: impl Into<String>, auth: AuthHeaders, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            auth,
            connect_timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.socket_url(),
            config.auth.clone(),
            config.connect_timeout,
        )
    }

    async fn handshake(&self) -> Result<WsStream, TransportError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(cookie) = &self.auth.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| protocol(format!("invalid cookie header: {e}")))?;
            request.headers_mut().insert(header::COOKIE, value);
        }
        if let Some(token) = &self.auth.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| protocol(format!("invalid token: {e}")))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let (mut ws, _) = connect_async(request).await?;

        match next_packet(&mut ws).await? {
            Packet::Open(info) => debug!(sid = ?info.get("sid"), "engine.io session opened"),
            other => return Err(protocol(format!("expected open packet, got {other:?}"))),
        }

        let connect = match &self.auth.token {
            Some(token) => Packet::Connect(json!({ "token": token })),
            None => Packet::Connect(Value::Null),
        };
        ws.send(Message::Text(connect.encode())).await?;

        loop {
            match next_packet(&mut ws).await? {
                Packet::Connect(_) => return Ok(ws),
                Packet::ConnectError(body) => return Err(TransportError::Auth(error_message(&body))),
                Packet::Ping => ws.send(Message::Text(Packet::Pong.encode())).await?,
                other => trace!(?other, "ignoring packet during handshake"),
            }
        }
    }
}

async fn next_packet(ws: &mut WsStream) -> Result<Packet, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Packet::parse(&text),
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn connect(&self) -> Result<Box<dyn SyncChannel>, TransportError> {
        let ws = tokio::time::timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                url: self.url.clone(),
                after_ms: self.connect_timeout.as_millis() as u64,
            })??;
        debug!(url = %self.url, "socket.io connected");
        Ok(Box::new(SocketIoChannel::spawn(ws)))
    }
}

/// A connected Socket.IO namespace with its reader/writer tasks.
pub struct SocketIoChannel {
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketIoChannel {
    fn spawn(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let writer = tokio::spawn(write_loop(sink, rx));
        let reader = tokio::spawn(read_loop(stream, outbound.clone(), shared.clone()));

        Self {
            outbound,
            shared,
            next_id: AtomicU64::new(0),
            tasks: Mutex::new(vec![reader, writer]),
        }
    }

    fn send(&self, packet: Packet) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Message::Text(packet.encode()))
            .map_err(|_| TransportError::Closed)
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match Packet::parse(&text) {
                Ok(Packet::Ping) => {
                    let _ = outbound.send(Message::Text(Packet::Pong.encode()));
                }
                Ok(Packet::Ack { id, data }) => {
                    if let Some(waiter) = shared.pending.lock().remove(&id) {
                        let _ = waiter.send(ack_value(data));
                    }
                }
                Ok(Packet::Event { data, .. }) => {
                    trace!(event = ?data.get(0), "ignoring server event");
                }
                Ok(Packet::Disconnect | Packet::Close) => break,
                Ok(_) => {}
                Err(err) => warn!(error = %err, "dropping malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "websocket read failed");
                break;
            }
        }
    }
    debug!("socket.io reader finished");
    shared.shut();
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(err) = sink.send(message).await {
            debug!(error = %err, "websocket write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

#[async_trait]
impl SyncChannel for SocketIoChannel {
    async fn request(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let packet = Packet::Event {
            id: Some(id),
            data: json!([event, payload]),
        };
        if let Err(err) = self.send(packet) {
            self.shared.pending.lock().remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(TransportError::RequestTimeout {
                    event: event.to_string(),
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.send(Packet::Event {
            id: None,
            data: json!([event, payload]),
        })
    }

    async fn close(&self) {
        if !self.shared.closed.load(Ordering::SeqCst) {
            let _ = self.send(Packet::Disconnect);
            let _ = self.outbound.send(Message::Close(None));
        }
        self.shared.shut();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let mut tasks = tasks.into_iter();
        if let Some(reader) = tasks.next() {
            reader.abort();
        }
        for writer in tasks {
            if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!("writer did not flush before close");
            }
        }
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
