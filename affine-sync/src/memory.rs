//! In-process sync server speaking the `space:*` protocol.
//!
//! Keeps one yrs doc per (workspace, doc id) and answers the same replies the
//! real server does, so operations can run end to end without a network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use affine_core::store;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;
use yrs::updates::decoder::Decode;
use yrs::{Doc, StateVector};

use crate::error::TransportError;
use crate::protocol::{
    decode_bytes, encode_bytes, ERR_DOC_NOT_FOUND, ERR_VERSION_REJECTED, EVENT_DELETE_DOC,
    EVENT_JOIN, EVENT_LEAVE, EVENT_LOAD_DOC, EVENT_PUSH_DOC_UPDATE,
};
use crate::transport::{Connector, SyncChannel};

#[derive(Default)]
struct ServerState {
    docs: HashMap<(String, String), Doc>,
    pushes: Vec<(String, String)>,
    connects: usize,
    open_channels: usize,
    rejected_versions: HashSet<String>,
    stalled_events: HashSet<String>,
    clock: i64,
}

fn error_reply(name: &str, message: impl Into<String>) -> Value {
    json!({ "error": { "name": name, "message": message.into() } })
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }

    /// Store `doc`'s full state under (`workspace`, `doc_id`).
    pub fn seed(&self, workspace: &str, doc_id: &str, doc: &Doc) {
        let replica = Doc::new();
        let _ = store::apply_update(&replica, &store::encode_state(doc));
        self.state
            .lock()
            .docs
            .insert((workspace.to_string(), doc_id.to_string()), replica);
    }

    /// A copy of the stored document, if any.
    pub fn snapshot(&self, workspace: &str, doc_id: &str) -> Option<Doc> {
        let state = self.state.lock();
        let doc = state.docs.get(&(workspace.to_string(), doc_id.to_string()))?;
        let replica = Doc::new();
        store::apply_update(&replica, &store::encode_state(doc)).ok()?;
        Some(replica)
    }

    pub fn has_doc(&self, workspace: &str, doc_id: &str) -> bool {
        self.state
            .lock()
            .docs
            .contains_key(&(workspace.to_string(), doc_id.to_string()))
    }

    /// Number of accepted pushes, across all docs.
    pub fn push_count(&self) -> usize {
        self.state.lock().pushes.len()
    }

    /// Doc ids that received pushes, in order.
    pub fn pushed_docs(&self) -> Vec<String> {
        self.state
            .lock()
            .pushes
            .iter()
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn open_channels(&self) -> usize {
        self.state.lock().open_channels
    }

    pub fn reject_client_version(&self, version: &str) {
        self.state
            .lock()
            .rejected_versions
            .insert(version.to_string());
    }

    /// Never answer `event` from now on.
    pub fn stall(&self, event: &str) {
        self.state.lock().stalled_events.insert(event.to_string());
    }

    fn is_stalled(&self, event: &str) -> bool {
        self.state.lock().stalled_events.contains(event)
    }

    fn release_channel(&self) {
        let mut state = self.state.lock();
        state.open_channels = state.open_channels.saturating_sub(1);
    }

    fn handle(&self, joined: &mut Option<String>, event: &str, payload: &Value) -> Value {
        let mut state = self.state.lock();
        state.clock += 1;
        let now = state.clock;

        if event == EVENT_JOIN {
            let version = str_field(payload, "clientVersion").unwrap_or_default();
            if state.rejected_versions.contains(version) {
                return error_reply(
                    ERR_VERSION_REJECTED,
                    format!("client version {version} is not supported"),
                );
            }
            let Some(space) = str_field(payload, "spaceId") else {
                return error_reply("BAD_REQUEST", "missing spaceId");
            };
            *joined = Some(space.to_string());
            return json!({ "data": { "clientId": "memory", "success": true } });
        }

        let Some(space) = str_field(payload, "spaceId") else {
            return error_reply("BAD_REQUEST", "missing spaceId");
        };
        if joined.as_deref() != Some(space) {
            return error_reply("NOT_IN_SPACE", format!("join {space} first"));
        }
        if event == EVENT_LEAVE {
            *joined = None;
            return json!({ "data": {} });
        }

        let Some(doc_id) = str_field(payload, "docId") else {
            return error_reply("BAD_REQUEST", "missing docId");
        };
        let key = (space.to_string(), doc_id.to_string());

        match event {
            EVENT_LOAD_DOC => {
                let Some(doc) = state.docs.get(&key) else {
                    return error_reply(ERR_DOC_NOT_FOUND, format!("doc {doc_id} not found"));
                };
                let since = str_field(payload, "stateVector")
                    .and_then(|sv| decode_bytes(sv).ok())
                    .and_then(|bytes| StateVector::decode_v1(&bytes).ok())
                    .unwrap_or_default();
                let missing = store::encode_diff(doc, &since);
                json!({ "data": { "missing": encode_bytes(&missing), "timestamp": now } })
            }
            EVENT_PUSH_DOC_UPDATE => {
                let Some(update) = str_field(payload, "update").and_then(|u| decode_bytes(u).ok())
                else {
                    return error_reply("BAD_REQUEST", "missing or invalid update");
                };
                let doc = state.docs.entry(key.clone()).or_insert_with(Doc::new);
                if let Err(err) = store::apply_update(doc, &update) {
                    return error_reply("INVALID_UPDATE", err.to_string());
                }
                state.pushes.push(key);
                debug!(doc_id, bytes = update.len(), "memory server accepted update");
                json!({ "data": { "accepted": true, "timestamp": now } })
            }
            EVENT_DELETE_DOC => {
                state.docs.remove(&key);
                json!({ "data": {} })
            }
            other => error_reply("UNKNOWN_EVENT", format!("unsupported event {other}")),
        }
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn SyncChannel>, TransportError> {
        {
            let mut state = self.server.state.lock();
            state.connects += 1;
            state.open_channels += 1;
        }
        Ok(Box::new(MemoryChannel {
            server: self.server.clone(),
            joined: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MemoryChannel {
    server: MemoryServer,
    joined: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn dispatch(&self, event: &str, payload: &Value) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut joined = self.joined.lock();
        Ok(self.server.handle(&mut joined, event, payload))
    }
}

#[async_trait]
impl SyncChannel for MemoryChannel {
    async fn request(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        if self.server.is_stalled(event) {
            tokio::time::sleep(timeout).await;
            return Err(TransportError::RequestTimeout {
                event: event.to_string(),
                after_ms: timeout.as_millis() as u64,
            });
        }
        self.dispatch(event, &payload)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.dispatch(event, &payload).map(|_| ())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.release_channel();
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.release_channel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_join_before_doc_events() {
        let server = MemoryServer::new();
        let channel = server.connector().connect().await.unwrap();
        let timeout = Duration::from_secs(1);

        let reply = channel
            .request(EVENT_LOAD_DOC, json!({"spaceId": "ws", "docId": "d"}), timeout)
            .await
            .unwrap();
        assert_eq!(reply["error"]["name"], "NOT_IN_SPACE");

        channel
            .request(EVENT_JOIN, json!({"spaceId": "ws", "clientVersion": "1"}), timeout)
            .await
            .unwrap();
        let reply = channel
            .request(EVENT_LOAD_DOC, json!({"spaceId": "ws", "docId": "d"}), timeout)
            .await
            .unwrap();
        assert_eq!(reply["error"]["name"], ERR_DOC_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_channels_are_released_on_close_and_drop() {
        let server = MemoryServer::new();
        let first = server.connector().connect().await.unwrap();
        let second = server.connector().connect().await.unwrap();
        assert_eq!(server.open_channels(), 2);

        first.close().await;
        first.close().await;
        assert_eq!(server.open_channels(), 1);
        drop(second);
        assert_eq!(server.open_channels(), 0);
        assert_eq!(server.connect_count(), 2);
    }
}
