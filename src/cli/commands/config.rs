//! Config command implementation

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::app::App;
use crate::config::RuntimeConfig;
use crate::models::config::BinderConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the default configuration file
    Init {
        /// Initialize global config (~/.config/lspbind)
        #[arg(long)]
        global: bool,

        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Show global config only
        #[arg(long)]
        global: bool,
    },

    /// Show config file path
    Path {
        /// Show global config path
        #[arg(long)]
        global: bool,
    },
}

#[derive(Serialize)]
struct ConfigInitResponse {
    status: String,
    path: String,
    level: &'static str,
}

#[derive(Serialize)]
struct ConfigShowResponse {
    level: &'static str,
    config: serde_json::Value,
    runtime: RuntimeOutput,
}

#[derive(Serialize)]
struct ConfigPathResponse {
    level: &'static str,
    path: String,
    exists: bool,
}

/// Resolved timings, in milliseconds
#[derive(Serialize)]
struct RuntimeOutput {
    keep_alive_ms: u128,
    reap_interval_ms: u128,
    handshake_poll_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    handshake_timeout_ms: Option<u128>,
    request_timeout_ms: u128,
    debounce_ms: u128,
}

impl From<&BinderConfig> for RuntimeOutput {
    fn from(config: &BinderConfig) -> Self {
        let runtime = RuntimeConfig::from(config);
        Self {
            keep_alive_ms: runtime.keep_alive.as_millis(),
            reap_interval_ms: runtime.reap_interval().as_millis(),
            handshake_poll_ms: runtime.handshake_poll.as_millis(),
            handshake_timeout_ms: runtime.handshake_timeout.map(|t| t.as_millis()),
            request_timeout_ms: runtime.request_timeout.as_millis(),
            debounce_ms: runtime.debounce.as_millis(),
        }
    }
}

pub async fn execute(args: ConfigArgs, app: &App) -> Result<()> {
    let ctx = &app.output;

    match args.command {
        ConfigCommand::Init { global, force } => {
            let level = if global { "global" } else { "project" };
            match app.config_service.init(global, force).await {
                Ok(path) => {
                    let response = ConfigInitResponse {
                        status: "created".to_string(),
                        path: if global {
                            path.display().to_string()
                        } else {
                            ctx.relative_path(&path)
                        },
                        level,
                    };
                    ctx.print_success_flat(response);
                }
                Err(e) => ctx.print_error(&e.to_string()),
            }
        }

        ConfigCommand::Show { global } => {
            let level = if global { "global" } else { "merged" };
            match app.config_service.load(global).await {
                Ok(config) => {
                    let response = ConfigShowResponse {
                        level,
                        config: serde_json::to_value(&config)?,
                        runtime: RuntimeOutput::from(&config),
                    };
                    ctx.print_success_flat(response);
                }
                Err(e) => ctx.print_error(&e.to_string()),
            }
        }

        ConfigCommand::Path { global } => {
            let level = if global { "global" } else { "project" };
            let path = app.config_service.config_path(global);
            let response = ConfigPathResponse {
                level,
                path: if global {
                    path.display().to_string()
                } else {
                    ctx.relative_path(&path)
                },
                exists: path.exists(),
            };
            ctx.print_success_flat(response);
        }
    }

    Ok(())
}
