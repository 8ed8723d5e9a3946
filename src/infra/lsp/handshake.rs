//! initialize / initialized exchange
//!
//! The initialize response is polled in short slices so a server process
//! that dies mid-handshake is noticed between polls instead of hanging the
//! caller. Protocol-level trouble degrades to empty capabilities; only a
//! failure to put the request on the wire is an error.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use serde_json::{Value, json};

use super::capabilities::Capabilities;
use super::client::{LspConnection, workspace_folder};
use super::protocol::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult,
    TextDocumentClientCapabilities, WorkspaceClientCapabilities,
};
use super::transport::ProcessHandle;
use crate::config::RuntimeConfig;
use crate::error::LspError;
use crate::models::workspace::path_to_uri;

/// Built once, shared by every session.
static CLIENT_CAPABILITIES: LazyLock<ClientCapabilities> = LazyLock::new(build_capabilities);

fn build_capabilities() -> ClientCapabilities {
    let symbol_kinds: Vec<u32> = (1..=26).collect();

    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            document_symbol: Some(json!({
                "dynamicRegistration": true,
                "hierarchicalDocumentSymbolSupport": true,
                "symbolKind": { "valueSet": symbol_kinds }
            })),
            document_highlight: Some(json!({
                "dynamicRegistration": true
            })),
            completion: Some(json!({
                "dynamicRegistration": true,
                "contextSupport": true
            })),
        }),
        workspace: Some(WorkspaceClientCapabilities {
            workspace_edit: Some(json!({
                "documentChanges": true,
                "resourceOperations": ["create", "rename", "delete"]
            })),
            symbol: Some(json!({
                "dynamicRegistration": true,
                "symbolKind": { "valueSet": symbol_kinds }
            })),
        }),
    }
}

pub fn client_capabilities() -> &'static ClientCapabilities {
    &CLIENT_CAPABILITIES
}

pub fn initialize_params(root: &Path) -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        root_uri: Some(path_to_uri(root)),
        root_path: Some(root.to_string_lossy().into_owned()),
        capabilities: client_capabilities().clone(),
        client_info: Some(ClientInfo {
            name: "lspbind".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        workspace_folders: Some(vec![workspace_folder(root)]),
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandshakeOutcome {
    pub capabilities: Capabilities,
    /// The server went away before answering. No session should be built.
    pub process_exited: bool,
    /// The configured wall-clock bound elapsed with the server still alive.
    pub timed_out: bool,
}

impl HandshakeOutcome {
    fn exited() -> Self {
        Self {
            process_exited: true,
            ..Self::default()
        }
    }

    fn degraded() -> Self {
        Self::default()
    }
}

/// Run the handshake on a fresh connection.
///
/// Without a process handle there is no liveness escape; the loop ends on
/// a response, a closed connection, or the optional overall bound.
pub async fn perform(
    connection: &LspConnection,
    process: Option<&dyn ProcessHandle>,
    root: &Path,
    config: &RuntimeConfig,
) -> Result<HandshakeOutcome, LspError> {
    let params = serde_json::to_value(initialize_params(root))?;
    let mut pending = connection.send_request("initialize", Some(params)).await?;

    let started = tokio::time::Instant::now();
    let poll = config.handshake_poll.max(Duration::from_millis(1));

    loop {
        match pending.wait_for(poll).await {
            Some(Ok(value)) => return finish(connection, value).await,
            Some(Err(LspError::ConnectionClosed)) => {
                tracing::warn!(
                    "{} closed the connection during initialize",
                    connection.name()
                );
                return Ok(HandshakeOutcome::exited());
            }
            Some(Err(e)) => {
                tracing::warn!("{} rejected initialize: {}", connection.name(), e);
                return Ok(HandshakeOutcome::degraded());
            }
            None => {
                if let Some(process) = process
                    && !process.is_alive()
                {
                    tracing::warn!(
                        "{} exited before answering initialize",
                        connection.name()
                    );
                    return Ok(HandshakeOutcome::exited());
                }

                if connection.is_closed() {
                    tracing::warn!(
                        "{} connection closed before answering initialize",
                        connection.name()
                    );
                    return Ok(HandshakeOutcome::exited());
                }

                if let Some(limit) = config.handshake_timeout
                    && started.elapsed() >= limit
                {
                    tracing::warn!(
                        "{} did not answer initialize within {}s, continuing without capabilities",
                        connection.name(),
                        limit.as_secs()
                    );
                    connection.cancel_request(pending.id()).await;
                    return Ok(HandshakeOutcome {
                        timed_out: true,
                        ..HandshakeOutcome::default()
                    });
                }
            }
        }
    }
}

async fn finish(connection: &LspConnection, value: Value) -> Result<HandshakeOutcome, LspError> {
    if value.is_null() {
        tracing::warn!("{} answered initialize with null", connection.name());
        return Ok(HandshakeOutcome::degraded());
    }

    let result = match serde_json::from_value::<InitializeResult>(value) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                "{} sent a malformed initialize result: {}",
                connection.name(),
                e
            );
            InitializeResult::default()
        }
    };

    // Nothing reaches callers before this notification is on the wire
    connection.notify("initialized", Some(json!({}))).await?;

    if let Some(info) = &result.server_info {
        tracing::debug!(
            "{} initialized: {} {}",
            connection.name(),
            info.name,
            info.version.as_deref().unwrap_or("")
        );
    }

    Ok(HandshakeOutcome {
        capabilities: Capabilities::from_initialize(result),
        ..HandshakeOutcome::default()
    })
}
