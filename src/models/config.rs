//! Configuration model for lspbind
//!
//! Every field is defaulted so a partial (or missing) file still loads.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// lspbind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinderConfig {
    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub tasks: TaskSettings,

    /// File extension (without dot) to content type.
    #[serde(default = "default_content_types")]
    pub content_types: BTreeMap<String, String>,

    #[serde(default = "default_servers")]
    pub servers: Vec<ServerEntry>,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            tasks: TaskSettings::default(),
            content_types: default_content_types(),
            servers: default_servers(),
        }
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "defaults::keep_alive_mins")]
    pub keep_alive_mins: u64,

    #[serde(default = "defaults::handshake_poll_ms")]
    pub handshake_poll_ms: u64,

    /// Overall handshake bound; 0 waits as long as the process lives.
    #[serde(default)]
    pub handshake_timeout_secs: u64,

    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "defaults::shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default = "defaults::exit_wait_secs")]
    pub exit_wait_secs: u64,

    /// Record server log messages in the in-memory communication log.
    #[serde(default)]
    pub communication_log: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            keep_alive_mins: defaults::keep_alive_mins(),
            handshake_poll_ms: defaults::handshake_poll_ms(),
            handshake_timeout_secs: 0,
            request_timeout_ms: defaults::request_timeout_ms(),
            shutdown_timeout_secs: defaults::shutdown_timeout_secs(),
            exit_wait_secs: defaults::exit_wait_secs(),
            communication_log: false,
        }
    }
}

/// Background task settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    #[serde(default = "defaults::debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            debounce_ms: defaults::debounce_ms(),
        }
    }
}

/// One configured language server command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEntry {
    pub name: String,
    pub content_types: Vec<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerEntry {
    fn new(name: &str, content_types: &[&str], command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            content_types: content_types.iter().map(|s| s.to_string()).collect(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
        }
    }
}

mod defaults {
    pub fn keep_alive_mins() -> u64 {
        10
    }
    pub fn handshake_poll_ms() -> u64 {
        100
    }
    pub fn request_timeout_ms() -> u64 {
        500
    }
    pub fn shutdown_timeout_secs() -> u64 {
        30
    }
    pub fn exit_wait_secs() -> u64 {
        30
    }
    pub fn debounce_ms() -> u64 {
        500
    }
}

fn default_content_types() -> BTreeMap<String, String> {
    [
        ("rs", "text/x-rust"),
        ("py", "text/x-python"),
        ("pyi", "text/x-python"),
        ("go", "text/x-go"),
        ("ts", "text/typescript"),
        ("tsx", "text/typescript"),
        ("js", "text/javascript"),
        ("jsx", "text/javascript"),
        ("mjs", "text/javascript"),
        ("c", "text/x-c"),
        ("h", "text/x-c"),
        ("cc", "text/x-c++"),
        ("cpp", "text/x-c++"),
        ("hpp", "text/x-c++"),
        ("java", "text/x-java"),
        ("json", "application/json"),
    ]
    .into_iter()
    .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
    .collect()
}

fn default_servers() -> Vec<ServerEntry> {
    vec![
        ServerEntry::new("rust-analyzer", &["text/x-rust"], "rust-analyzer", &[]),
        ServerEntry::new(
            "pyright",
            &["text/x-python"],
            "pyright-langserver",
            &["--stdio"],
        ),
        ServerEntry::new("gopls", &["text/x-go"], "gopls", &[]),
        ServerEntry::new(
            "typescript-language-server",
            &["text/typescript", "text/javascript"],
            "typescript-language-server",
            &["--stdio"],
        ),
        ServerEntry::new(
            "clangd",
            &["text/x-c", "text/x-c++"],
            "clangd",
            &["--background-index"],
        ),
        ServerEntry::new("jdtls", &["text/x-java"], "jdtls", &[]),
    ]
}
