//! The four `space:*` messages of the sync server.
//!
//! Replies are `{ "data": … }` on success or `{ "error": { "name", "message" } }`
//! on failure. Binary payloads (updates, state vectors) travel as base64.

use std::time::Duration;

use affine_types::WorkspaceId;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::SyncChannel;

pub const SPACE_TYPE: &str = "workspace";

pub const EVENT_JOIN: &str = "space:join";
pub const EVENT_LEAVE: &str = "space:leave";
pub const EVENT_LOAD_DOC: &str = "space:load-doc";
pub const EVENT_PUSH_DOC_UPDATE: &str = "space:push-doc-update";
pub const EVENT_DELETE_DOC: &str = "space:delete-doc";

/// Error names the server uses for the cases callers handle specially.
pub const ERR_DOC_NOT_FOUND: &str = "DOC_NOT_FOUND";
pub const ERR_VERSION_REJECTED: &str = "VERSION_REJECTED";
pub const ERR_UNSUPPORTED_CLIENT_VERSION: &str = "UNSUPPORTED_CLIENT_VERSION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub name: String,
    #[serde(default)]
    pub message: String,
}

impl From<RemoteError> for TransportError {
    fn from(err: RemoteError) -> Self {
        TransportError::Remote {
            name: err.name,
            message: err.message,
        }
    }
}

/// Split a reply into its `data` payload or its `error`.
pub fn split_reply(reply: Value) -> Result<Result<Value, RemoteError>, TransportError> {
    let Value::Object(mut body) = reply else {
        return Err(TransportError::Protocol(format!(
            "expected an object reply, got {reply}"
        )));
    };
    if let Some(error) = body.remove("error") {
        let error: RemoteError = serde_json::from_value(error)
            .map_err(|e| TransportError::Protocol(format!("malformed error reply: {e}")))?;
        return Ok(Err(error));
    }
    Ok(Ok(body.remove("data").unwrap_or(Value::Null)))
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_bytes(text: &str) -> Result<Vec<u8>, TransportError> {
    STANDARD
        .decode(text)
        .map_err(|e| TransportError::Protocol(format!("invalid base64 payload: {e}")))
}

pub async fn join(
    channel: &dyn SyncChannel,
    workspace: &WorkspaceId,
    client_version: &str,
    timeout: Duration,
) -> Result<(), TransportError> {
    let payload = json!({
        "spaceType": SPACE_TYPE,
        "spaceId": workspace.as_str(),
        "clientVersion": client_version,
    });
    let reply = channel
        .request(EVENT_JOIN, payload, timeout)
        .await
        .map_err(|err| match err {
            TransportError::RequestTimeout { after_ms, .. } => TransportError::JoinTimeout {
                workspace: workspace.to_string(),
                after_ms,
            },
            other => other,
        })?;

    match split_reply(reply)? {
        Ok(_) => {
            debug!(workspace = %workspace, "joined space");
            Ok(())
        }
        Err(err) if err.name == ERR_VERSION_REJECTED || err.name == ERR_UNSUPPORTED_CLIENT_VERSION => {
            Err(TransportError::VersionMismatch {
                version: client_version.to_string(),
                message: err.message,
            })
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn leave(channel: &dyn SyncChannel, workspace: &WorkspaceId) -> Result<(), TransportError> {
    channel
        .emit(
            EVENT_LEAVE,
            json!({ "spaceType": SPACE_TYPE, "spaceId": workspace.as_str() }),
        )
        .await
}

/// Fetch the full state of `doc_id` as one update; `None` when the server
/// has no such document or answers without any state.
pub async fn load_doc(
    channel: &dyn SyncChannel,
    workspace: &WorkspaceId,
    doc_id: &str,
    timeout: Duration,
) -> Result<Option<Vec<u8>>, TransportError> {
    let payload = json!({
        "spaceType": SPACE_TYPE,
        "spaceId": workspace.as_str(),
        "docId": doc_id,
    });
    let reply = channel.request(EVENT_LOAD_DOC, payload, timeout).await?;
    match split_reply(reply)? {
        // A reply without `missing` means the server has nothing for this doc yet.
        Ok(data) => match data.get("missing").and_then(Value::as_str) {
            Some(missing) => Ok(Some(decode_bytes(missing)?)),
            None => Ok(None),
        },
        Err(err) if err.name == ERR_DOC_NOT_FOUND => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Push one update; returns the server timestamp of the accepted update.
pub async fn push_doc_update(
    channel: &dyn SyncChannel,
    workspace: &WorkspaceId,
    doc_id: &str,
    update: &[u8],
    timeout: Duration,
) -> Result<i64, TransportError> {
    let payload = json!({
        "spaceType": SPACE_TYPE,
        "spaceId": workspace.as_str(),
        "docId": doc_id,
        "update": encode_bytes(update),
    });
    let reply = channel
        .request(EVENT_PUSH_DOC_UPDATE, payload, timeout)
        .await
        .map_err(|err| match err {
            TransportError::RequestTimeout { after_ms, .. } => TransportError::PushTimeout {
                doc_id: doc_id.to_string(),
                after_ms,
            },
            other => other,
        })?;

    match split_reply(reply)? {
        Ok(data) => {
            if data.get("accepted").and_then(Value::as_bool) == Some(false) {
                return Err(TransportError::PushRejected {
                    doc_id: doc_id.to_string(),
                    message: "update not accepted".to_string(),
                });
            }
            Ok(data.get("timestamp").and_then(Value::as_i64).unwrap_or_default())
        }
        Err(err) => Err(TransportError::PushRejected {
            doc_id: doc_id.to_string(),
            message: format!("{}: {}", err.name, err.message),
        }),
    }
}

/// Ask the server to drop `doc_id`. No acknowledgement is awaited.
pub async fn delete_doc(
    channel: &dyn SyncChannel,
    workspace: &WorkspaceId,
    doc_id: &str,
) -> Result<(), TransportError> {
    channel
        .emit(
            EVENT_DELETE_DOC,
            json!({
                "spaceType": SPACE_TYPE,
                "spaceId": workspace.as_str(),
                "docId": doc_id,
            }),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reply() {
        assert_eq!(
            split_reply(json!({"data": {"accepted": true}})).unwrap(),
            Ok(json!({"accepted": true}))
        );
        assert_eq!(
            split_reply(json!({"error": {"name": "DOC_NOT_FOUND", "message": "gone"}})).unwrap(),
            Err(RemoteError {
                name: "DOC_NOT_FOUND".into(),
                message: "gone".into()
            })
        );
        assert!(split_reply(json!("nope")).is_err());
    }

    /// Answers every request with the same reply.
    struct FixedReply(Value);

    #[async_trait::async_trait]
    impl SyncChannel for FixedReply {
        async fn request(
            &self,
            _event: &str,
            _payload: Value,
            _timeout: Duration,
        ) -> Result<Value, TransportError> {
            Ok(self.0.clone())
        }

        async fn emit(&self, _event: &str, _payload: Value) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    async fn load_with(reply: Value) -> Result<Option<Vec<u8>>, TransportError> {
        let workspace = WorkspaceId::new("ws");
        load_doc(&FixedReply(reply), &workspace, "d", Duration::from_secs(1)).await
    }

    #[tokio::test]
    async fn test_load_doc_without_state_is_empty() {
        assert_eq!(load_with(json!({"data": {}})).await.unwrap(), None);
        assert_eq!(load_with(json!({"data": null})).await.unwrap(), None);
        assert_eq!(
            load_with(json!({"error": {"name": ERR_DOC_NOT_FOUND, "message": "gone"}}))
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            load_with(json!({"data": {"missing": encode_bytes(&[1, 2])}}))
                .await
                .unwrap(),
            Some(vec![1, 2])
        );
        assert!(matches!(
            load_with(json!({"error": {"name": "FORBIDDEN", "message": "no"}})).await,
            Err(TransportError::Remote { .. })
        ));
    }

    #[test]
    fn test_base64_payloads() {
        let bytes = vec![0u8, 1, 2, 250];
        assert_eq!(decode_bytes(&encode_bytes(&bytes)).unwrap(), bytes);
        assert!(decode_bytes("***").is_err());
    }
}
