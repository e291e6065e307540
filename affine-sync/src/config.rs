use std::time::Duration;

use affine_types::WorkspaceId;
use anyhow::{bail, Result};

use crate::cli::Cli;

pub const DEFAULT_CLIENT_VERSION: &str = "0.21.0";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Credentials attached to the WebSocket upgrade request.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaders {
    /// Raw `Cookie` header value (session cookie).
    pub cookie: Option<String>,
    /// Access token sent as `Authorization: Bearer …`.
    pub token: Option<String>,
}

/// Runtime configuration derived from CLI/env.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub workspace_id: WorkspaceId,
    pub client_version: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub auth: AuthHeaders,
    /// Reject block properties that do not apply to the block type.
    pub strict: bool,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>, workspace_id: impl Into<WorkspaceId>) -> Self {
        Self {
            base_url: base_url.into(),
            workspace_id: workspace_id.into(),
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            auth: AuthHeaders::default(),
            strict: true,
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let base_url = cli.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("base url must start with http:// or https://, got {base_url}");
        }
        if cli.workspace.trim().is_empty() {
            bail!("a workspace id is required");
        }

        Ok(Self {
            base_url,
            workspace_id: WorkspaceId::new(cli.workspace.clone()),
            client_version: cli.client_version.clone(),
            connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
            request_timeout: Duration::from_millis(cli.request_timeout_ms),
            auth: AuthHeaders {
                cookie: cli.cookie.clone(),
                token: cli.token.clone(),
            },
            strict: !cli.lenient,
        })
    }

    /// Engine.IO WebSocket endpoint for `base_url`.
    pub fn socket_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws = match base.strip_prefix("https://") {
            Some(rest) => format!("wss://{rest}"),
            None => match base.strip_prefix("http://") {
                Some(rest) => format!("ws://{rest}"),
                None => base.to_string(),
            },
        };
        format!("{ws}/socket.io/?EIO=4&transport=websocket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url() {
        let cfg = SyncConfig::new("https://app.affine.pro/", "ws1");
        assert_eq!(
            cfg.socket_url(),
            "wss://app.affine.pro/socket.io/?EIO=4&transport=websocket"
        );
        let local = SyncConfig::new("http://localhost:3010", "ws1");
        assert_eq!(
            local.socket_url(),
            "ws://localhost:3010/socket.io/?EIO=4&transport=websocket"
        );
    }
}
