//! Attach command - connect to a server that is already listening

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::app::App;
use crate::cli::output::SessionOutput;
use crate::infra::lsp::ServerDescription;
use crate::models::workspace::canonical_dir;

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Workspace root the server serves
    pub root: PathBuf,

    /// TCP port the server listens on
    #[arg(long)]
    pub port: u16,

    /// Host the server listens on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// File extensions served by this connection (repeatable)
    #[arg(long, required = true)]
    pub ext: Vec<String>,
}

#[derive(Serialize)]
struct AttachResponse {
    address: String,
    extensions: Vec<String>,
    session: SessionOutput,
}

pub async fn execute(args: AttachArgs, app: &App) -> Result<()> {
    let ctx = &app.output;
    let root = canonical_dir(&args.root);
    if !root.is_dir() {
        ctx.print_error(&format!("Not a directory: {}", args.root.display()));
        return Ok(());
    }

    let address = SocketAddr::new(args.host, args.port);
    let description = ServerDescription::socket(format!("tcp:{address}"), address);

    match app.registry().attach(&root, description, &args.ext).await {
        Ok(session) => {
            let response = AttachResponse {
                address: address.to_string(),
                extensions: args.ext.clone(),
                session: SessionOutput::from_session(&session, ctx),
            };
            drop(session);
            app.shutdown().await;
            ctx.print_success_flat(response);
        }
        Err(e) => ctx.print_error(&e.to_string()),
    }

    Ok(())
}
