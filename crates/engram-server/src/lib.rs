//! # Engram Server
//!
//! REST/SSE facade and MCP-style tool surface over `engram-core`:
//!
//! - `/api/v1/think`: mode-mapped reasoning with rule-based fallback
//! - `/api/v1/reasoning/parallel`: multi-stream reasoning, sync or async,
//!   with per-session and per-stream SSE
//! - `/api/v1/memory/*`: memory CRUD, search, health, maintenance,
//!   pruning, and archival
//! - `/mcp`: JSON-RPC tool dispatch
//!
//! The binary wires configuration, logging, the scheduler, and graceful
//! shutdown around this library.

pub mod api;
pub mod config;
pub mod load;
pub mod mcp;
pub mod sse;
pub mod state;

pub use config::ServerConfig;
pub use state::{build, AppState, SharedState};
