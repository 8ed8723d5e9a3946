//! Probe command - start the server for a file and report on it

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use serde_json::json;

use crate::app::App;
use crate::cli::output::SessionOutput;
use crate::infra::lsp::{LogLine, Session};
use crate::models::workspace::path_to_uri;

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// File whose server should be started
    pub file: PathBuf,

    /// Open the file and wait this long for diagnostics before shutting down
    #[arg(long, default_value = "0")]
    pub hold_ms: u64,

    /// Include the server's log messages
    #[arg(long)]
    pub log: bool,
}

#[derive(Serialize)]
struct ProbeResponse {
    file: String,
    session: SessionOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    log: Vec<LogLine>,
}

/// `text/x-rust` -> `rust`
fn language_id(content_type: &str) -> &str {
    let subtype = content_type.rsplit('/').next().unwrap_or(content_type);
    subtype.strip_prefix("x-").unwrap_or(subtype)
}

async fn open_document(session: &Session, file: &Path) -> Result<()> {
    if !session.open_file(file) {
        return Ok(());
    }
    let text = tokio::fs::read_to_string(file).await?;
    let params = json!({
        "textDocument": {
            "uri": path_to_uri(file),
            "languageId": language_id(&session.key().content_type),
            "version": 1,
            "text": text,
        }
    });
    session
        .notify("textDocument/didOpen", Some(params))
        .await?;
    Ok(())
}

pub async fn execute(args: ProbeArgs, app: &App) -> Result<()> {
    let ctx = &app.output;
    let file = if args.file.is_absolute() {
        args.file.clone()
    } else {
        app.root().join(&args.file)
    };
    if !file.is_file() {
        ctx.print_error(&format!("File not found: {}", args.file.display()));
        return Ok(());
    }

    let registry = app.registry();
    let Some(content_type) = registry.content_types().for_file(&file) else {
        ctx.print_error(&format!(
            "No content type configured for {}",
            args.file.display()
        ));
        return Ok(());
    };
    tracing::debug!("Probing {} as {}", file.display(), content_type);

    let Some(session) = registry.resolve_file(&file).await else {
        ctx.print_error(&format!(
            "No server could be started for {} ({})",
            args.file.display(),
            content_type
        ));
        return Ok(());
    };
    if args.log {
        session.connection().log().set_enabled(true);
    }

    let diagnostics = if args.hold_ms > 0 {
        if let Err(e) = open_document(&session, &file).await {
            tracing::warn!("Could not open {}: {}", file.display(), e);
        }
        tokio::time::sleep(Duration::from_millis(args.hold_ms)).await;
        Some(session.diagnostics(&path_to_uri(&file)).len())
    } else {
        None
    };

    let response = ProbeResponse {
        file: ctx.relative_path(&file),
        session: SessionOutput::from_session(&session, ctx),
        diagnostics,
        log: if args.log {
            session.connection().log().lines()
        } else {
            Vec::new()
        },
    };
    drop(session);

    app.shutdown().await;
    ctx.print_success_flat(response);
    Ok(())
}
