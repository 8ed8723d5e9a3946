//! Output formatting for CLI commands

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::infra::lsp::protocol::ServerInfo;
use crate::infra::lsp::{Capabilities, Session, SessionId, SessionState};

/// Output context for consistent formatting across commands
#[derive(Debug, Clone)]
pub struct OutputContext {
    /// Base for relative paths
    root: PathBuf,
}

impl OutputContext {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative to the working directory when inside it
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }

    /// Print a successful response with data fields at top level
    pub fn print_success_flat<T: Serialize>(&self, data: T) {
        let mut response = serde_json::to_value(data).unwrap_or(serde_json::json!({}));
        if let Some(obj) = response.as_object_mut() {
            obj.insert("success".to_string(), serde_json::json!(true));
        }
        print_json(&response);
    }

    pub fn print_error(&self, message: &str) {
        let response = serde_json::json!({
            "success": false,
            "error": message
        });
        print_json(&response);
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize output: {e}"),
    }
}

/// Session description shared by `probe` and `attach`
#[derive(Debug, Serialize)]
pub struct SessionOutput {
    pub id: SessionId,
    pub server: String,
    pub root: String,
    pub content_type: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    pub capabilities: BTreeMap<&'static str, bool>,
}

impl SessionOutput {
    pub fn from_session(session: &Session, ctx: &OutputContext) -> Self {
        Self {
            id: session.id(),
            server: session.server_name().to_string(),
            root: ctx.relative_path(session.root()),
            content_type: session.key().content_type.clone(),
            state: session.state(),
            pid: session.process_id(),
            server_info: session.capabilities().server_info().cloned(),
            capabilities: capability_flags(session.capabilities()),
        }
    }
}

pub fn capability_flags(capabilities: &Capabilities) -> BTreeMap<&'static str, bool> {
    capabilities
        .summary()
        .into_iter()
        .map(|(feature, supported)| (feature.name(), supported))
        .collect()
}
