//! Data models for lspbind

pub mod config;
pub mod workspace;

pub use config::{BinderConfig, ServerEntry, SessionSettings, TaskSettings};
pub use workspace::SessionKey;
