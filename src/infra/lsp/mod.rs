//! LSP infrastructure for lspbind
//!
//! - JSON-RPC 2.0 protocol types and header framing
//! - Launching servers over stdio or TCP
//! - Sessions with their initialize handshake
//! - A registry keyed by project root and content type
//! - Idle eviction

pub mod capabilities;
pub mod client;
pub mod handshake;
pub mod log;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod servers;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use capabilities::{Capabilities, Feature};
pub use client::LspConnection;
pub use handshake::HandshakeOutcome;
pub use log::{LogLine, ServerLog};
pub use reaper::IdleReaper;
pub use registry::{SessionEvent, SessionRegistry};
pub use servers::{CommandProvider, ProviderContext, ProviderRegistry, ServerProvider};
pub use session::{Session, SessionId, SessionState};
pub use transport::{DefaultTransport, LaunchTarget, ServerDescription, Transport};
