//! Framed-stdio JSON-RPC transport used to speak LSP to child processes.

pub mod client;
pub mod frame;

pub use client::{LspClient, ServerMessage};
