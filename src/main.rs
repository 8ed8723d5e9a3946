//! lspbind - language server sessions on demand

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lspbind::app::App;
use lspbind::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // Quiet by default; RUST_LOG=lspbind=debug or --verbose for lifecycle detail
    let default_filter = if cli.verbose {
        "lspbind=debug"
    } else {
        "lspbind=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!(
                r#"{{"success":false,"error":"Failed to create runtime: {}"}}"#,
                e
            );
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(async_main(cli));

    if let Err(e) = result {
        let response = serde_json::json!({
            "success": false,
            "error": e.to_string()
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&response)
                .unwrap_or_else(|_| { format!(r#"{{"success":false,"error":"{}"}}"#, e) })
        );
        std::process::exit(2);
    }
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let app = App::new()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?;

    tokio::select! {
        result = execute_command(cli.command, &app) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::debug!("Interrupted, killing language servers");
            app.kill_all().await;
            Ok(())
        }
    }
}

async fn execute_command(command: Commands, app: &App) -> anyhow::Result<()> {
    use lspbind::cli::commands;

    match command {
        Commands::Probe(args) => commands::probe::execute(args, app).await,
        Commands::Attach(args) => commands::attach::execute(args, app).await,
        Commands::Servers(args) => commands::servers::execute(args, app).await,
        Commands::Config(args) => commands::config::execute(args, app).await,
    }
}
