//! Channel abstraction over the sync server's event protocol.
//!
//! A channel carries named events with JSON payloads. `request` waits for the
//! server's acknowledgement; `emit` does not. Channels are opened per logical
//! operation through a [`Connector`] and are never shared between operations.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Send `event` and wait up to `timeout` for the acknowledgement payload.
    async fn request(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    /// Send `event` without waiting for an acknowledgement.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Disconnect. Further calls fail with [`TransportError::Closed`].
    async fn close(&self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SyncChannel>, TransportError>;
}
