//! lspbind - language server sessions for editor-side tooling
//!
//! Launches language servers on demand, one per project root and content
//! type, tracks what each one can do and shuts idle ones down. Background
//! work bound to a file runs debounced against whichever session currently
//! serves it.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod models;
pub mod services;

pub use error::BinderError;
