//! Server providers
//!
//! A provider looks at a content type (and the project it belongs to) and
//! either describes how to reach a server or declines. Providers are
//! tried in registration order; the first description wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::transport::{LaunchTarget, ServerDescription};
use crate::models::config::{BinderConfig, ServerEntry};
use crate::models::workspace::SessionKey;

/// What a provider is asked about
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub content_type: String,
    /// Project directory, when the file belongs to a known project
    pub project: Option<PathBuf>,
    /// Root the session will be keyed on
    pub root: PathBuf,
}

impl ProviderContext {
    /// Key to pass to `SessionRegistry::restart` to relaunch this server.
    pub fn restart_key(&self) -> SessionKey {
        SessionKey::new(&self.root, self.content_type.clone())
    }
}

#[async_trait]
pub trait ServerProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `None` declines the content type.
    async fn describe(&self, context: &ProviderContext) -> Option<ServerDescription>;
}

/// Ordered provider table
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ServerProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `CommandProvider` per configured server, in file order.
    pub fn from_config(config: &BinderConfig) -> Self {
        let mut registry = Self::new();
        for entry in &config.servers {
            registry.register(Arc::new(CommandProvider::new(entry.clone())));
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn ServerProvider>) {
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn describe(&self, context: &ProviderContext) -> Option<ServerDescription> {
        for provider in &self.providers {
            if let Some(description) = provider.describe(context).await {
                tracing::debug!(
                    "Provider {} accepted {} for {}",
                    provider.name(),
                    context.content_type,
                    context.root.display()
                );
                return Some(description);
            }
        }
        None
    }
}

/// Provider backed by a `[[servers]]` config entry
pub struct CommandProvider {
    entry: ServerEntry,
    installed: OnceLock<bool>,
}

impl CommandProvider {
    pub fn new(entry: ServerEntry) -> Self {
        Self {
            entry,
            installed: OnceLock::new(),
        }
    }

    pub fn entry(&self) -> &ServerEntry {
        &self.entry
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        self.entry.content_types.iter().any(|ct| ct == content_type)
    }

    /// Whether the command resolves on PATH. Probed once.
    pub fn is_installed(&self) -> bool {
        *self
            .installed
            .get_or_init(|| command_exists(&self.entry.command))
    }

    pub fn description(&self) -> ServerDescription {
        ServerDescription {
            name: self.entry.name.clone(),
            target: LaunchTarget::Command {
                program: self.entry.command.clone(),
                args: self.entry.args.clone(),
                env: self.entry.env.clone(),
            },
        }
    }
}

#[async_trait]
impl ServerProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.entry.name
    }

    async fn describe(&self, context: &ProviderContext) -> Option<ServerDescription> {
        if !self.accepts(&context.content_type) {
            return None;
        }
        if !self.is_installed() {
            tracing::debug!(
                "{} not installed, declining {}",
                self.entry.command,
                context.content_type
            );
            return None;
        }
        Some(self.description())
    }
}

/// PATH lookup, or a file check for commands given as a path. No process
/// is spawned.
fn command_exists(command: &str) -> bool {
    which::which(command).is_ok()
}

/// Installed state of every configured server, for `config show`.
pub fn installed_servers(config: &BinderConfig) -> HashMap<String, bool> {
    config
        .servers
        .iter()
        .map(|entry| {
            let provider = CommandProvider::new(entry.clone());
            (entry.name.clone(), provider.is_installed())
        })
        .collect()
}
