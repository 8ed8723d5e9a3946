//! Servers command - configured language servers and their availability

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::infra::lsp::servers::installed_servers;

#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Only list servers whose command is not on PATH
    #[arg(long)]
    pub missing_only: bool,
}

#[derive(Serialize)]
struct ServersResponse {
    summary: ServersSummary,
    servers: Vec<ServerOutput>,
}

#[derive(Serialize)]
struct ServersSummary {
    installed: usize,
    missing: usize,
}

#[derive(Serialize)]
struct ServerOutput {
    name: String,
    command: String,
    content_types: Vec<String>,
    extensions: Vec<String>,
    installed: bool,
}

pub async fn execute(args: ServersArgs, app: &App) -> Result<()> {
    let config = app.config();
    let installed = installed_servers(config);
    let content_types = app.registry().content_types();

    let all: Vec<ServerOutput> = config
        .servers
        .iter()
        .map(|entry| ServerOutput {
            name: entry.name.clone(),
            command: entry.command.clone(),
            content_types: entry.content_types.clone(),
            extensions: entry
                .content_types
                .iter()
                .flat_map(|ct| content_types.extensions_for(ct))
                .map(str::to_string)
                .collect(),
            installed: installed.get(&entry.name).copied().unwrap_or(false),
        })
        .collect();

    let summary = ServersSummary {
        installed: all.iter().filter(|s| s.installed).count(),
        missing: all.iter().filter(|s| !s.installed).count(),
    };
    let servers = if args.missing_only {
        all.into_iter().filter(|s| !s.installed).collect()
    } else {
        all
    };

    app.output
        .print_success_flat(ServersResponse { summary, servers });
    Ok(())
}
