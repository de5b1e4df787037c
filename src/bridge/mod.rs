//! Tool Bridge: JSON-RPC access to tools hosted in worker processes.
//!
//! - **protocol**: JSON-RPC 2.0 / MCP wire types
//! - **client**: per-call worker spawn, handshake, call, shutdown
//! - **server**: the worker side, run via `--serve-tool`

pub mod client;
pub mod protocol;
pub mod server;

pub use client::ToolBridge;
pub use server::ToolServer;
