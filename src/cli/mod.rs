//! CLI module for lspbind
//!
//! Provides command-line interface using clap derive macros.

pub mod commands;
pub mod output;

pub use output::OutputContext;

use clap::{Parser, Subcommand};

use commands::{
    attach::AttachArgs, config::ConfigArgs, probe::ProbeArgs, servers::ServersArgs,
};

const LONG_ABOUT: &str = r#"
lspbind - language server sessions on demand

Starts the configured language server for a file's project and content
type, performs the initialize handshake and reports what the server
can do.

EXAMPLES:
  lspbind probe src/main.rs                  # Launch, handshake, print capabilities
  lspbind attach . --port 2087 --ext py      # Use a server already listening on TCP
  lspbind servers                            # Which configured servers are installed
  lspbind config show                        # Effective configuration
"#;

/// lspbind - language server sessions on demand
#[derive(Parser, Debug)]
#[command(name = "lspbind")]
#[command(author, version, about, long_about = LONG_ABOUT)]
#[command(propagate_version = true)]
#[command(after_help = "Use 'lspbind <COMMAND> --help' for more information about a command.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output (show debug info)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server for a file and print its capabilities
    Probe(ProbeArgs),

    /// Attach to a running server over TCP
    Attach(AttachArgs),

    /// List configured servers and whether they are installed
    Servers(ServersArgs),

    /// Configuration management
    Config(ConfigArgs),
}
