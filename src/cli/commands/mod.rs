//! Command implementations for lspbind
//!
//! Each command is implemented in its own module.

pub mod attach;
pub mod config;
pub mod probe;
pub mod servers;
