//! Infrastructure layer for lspbind
//!
//! Language server processes, wire protocol and session bookkeeping.

pub mod lsp;
