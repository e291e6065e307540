//! One connected, joined channel for the duration of one logical operation.

use std::time::Duration;

use affine_core::store;
use affine_types::WorkspaceId;
use tracing::{debug, info};
use yrs::{Doc, Snapshot};

use crate::config::SyncConfig;
use crate::error::{ServiceError, ServiceResult, TransportError};
use crate::protocol;
use crate::transport::{Connector, SyncChannel};

/// A document fetched in this session, with the state it was loaded at.
pub struct LoadedDoc {
    pub id: String,
    pub doc: Doc,
    pub before: Snapshot,
    /// Whether the server had this document.
    pub existed: bool,
}

impl LoadedDoc {
    /// New items or new deletions since the doc was loaded.
    pub fn is_changed(&self) -> bool {
        store::snapshot(&self.doc) != self.before
    }
}

/// Scoped channel: opened and joined by [`Session::open`], released by
/// [`Session::close`] or, on error paths, by `Drop`.
pub struct Session {
    channel: Option<Box<dyn SyncChannel>>,
    workspace: WorkspaceId,
    timeout: Duration,
}

impl Session {
    pub async fn open(connector: &dyn Connector, config: &SyncConfig) -> Result<Self, TransportError> {
        let channel = connector.connect().await?;
        if let Err(err) = protocol::join(
            channel.as_ref(),
            &config.workspace_id,
            &config.client_version,
            config.request_timeout,
        )
        .await
        {
            channel.close().await;
            return Err(err);
        }
        Ok(Self {
            channel: Some(channel),
            workspace: config.workspace_id.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    fn channel(&self) -> Result<&dyn SyncChannel, TransportError> {
        self.channel.as_deref().ok_or(TransportError::Closed)
    }

    /// Load `doc_id`; a missing document yields an empty doc with
    /// `existed == false`.
    pub async fn load(&self, doc_id: &str) -> Result<LoadedDoc, TransportError> {
        let doc = Doc::new();
        let update = protocol::load_doc(self.channel()?, &self.workspace, doc_id, self.timeout).await?;
        let existed = update.is_some();
        if let Some(update) = update {
            store::apply_update(&doc, &update)
                .map_err(|e| TransportError::Protocol(format!("undecodable doc {doc_id}: {e}")))?;
        }
        debug!(doc_id, existed, "loaded doc");
        Ok(LoadedDoc {
            id: doc_id.to_string(),
            before: store::snapshot(&doc),
            doc,
            existed,
        })
    }

    /// Like [`Session::load`], but a missing document is an error.
    pub async fn load_existing(&self, doc_id: &str) -> ServiceResult<LoadedDoc> {
        let loaded = self.load(doc_id).await?;
        if !loaded.existed {
            return Err(ServiceError::DocNotFound(doc_id.to_string()));
        }
        Ok(loaded)
    }

    /// Push everything added or deleted since the doc was loaded. Nothing is
    /// sent when the doc did not change; returns the server timestamp
    /// otherwise.
    pub async fn push_if_changed(&self, loaded: &LoadedDoc) -> Result<Option<i64>, TransportError> {
        if !loaded.is_changed() {
            debug!(doc_id = %loaded.id, "no changes; skipping push");
            return Ok(None);
        }
        let update = store::encode_diff(&loaded.doc, &loaded.before.state_map);
        let timestamp = protocol::push_doc_update(
            self.channel()?,
            &self.workspace,
            &loaded.id,
            &update,
            self.timeout,
        )
        .await?;
        info!(doc_id = %loaded.id, bytes = update.len(), "pushed update");
        Ok(Some(timestamp))
    }

    pub async fn delete_doc(&self, doc_id: &str) -> Result<(), TransportError> {
        protocol::delete_doc(self.channel()?, &self.workspace, doc_id).await
    }

    /// Leave the space and disconnect.
    pub async fn close(mut self) {
        if let Some(channel) = self.channel.take() {
            let _ = protocol::leave(channel.as_ref(), &self.workspace).await;
            channel.close().await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(channel) = self.channel.take() else {
            return;
        };
        debug!(workspace = %self.workspace, "releasing channel of an unfinished session");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { channel.close().await });
            }
            Err(_) => drop(channel),
        }
    }
}
