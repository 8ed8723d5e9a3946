//! Application container for lspbind

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::OutputContext;
use crate::infra::lsp::SessionRegistry;
use crate::models::config::BinderConfig;
use crate::services::config::{ConfigService, DefaultConfigService};

pub struct App {
    root: PathBuf,
    pub(crate) output: OutputContext,
    pub(crate) config_service: Arc<dyn ConfigService>,
    pub(crate) config: BinderConfig,
    pub(crate) registry: Arc<SessionRegistry>,
}

impl App {
    pub async fn new() -> anyhow::Result<Self> {
        let root = std::env::current_dir()?;
        Self::at(root).await
    }

    pub async fn at(root: PathBuf) -> anyhow::Result<Self> {
        tracing::debug!("Initializing lspbind at {:?}", root);

        let output = OutputContext::new(root.clone());
        let config_service = Arc::new(DefaultConfigService::new(&root));
        let config = match config_service.load(false).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default configuration: {}", e);
                BinderConfig::default()
            }
        };
        let registry = Arc::new(SessionRegistry::from_config(&config));

        Ok(Self {
            root,
            output,
            config_service,
            config,
            registry,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Graceful shutdown of every session, then a force-kill sweep over
    /// the same sessions.
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }

    /// Host exit: force-kill every registered server without the protocol
    /// exchange.
    pub async fn kill_all(&self) {
        self.registry.kill_all().await;
    }
}
