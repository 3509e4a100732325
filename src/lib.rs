//! A sandboxed code-execution MCP server with tiered container isolation and a live
//! inspector dashboard.

#![deny(missing_debug_implementations)]

pub mod commands;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod inspector;
pub mod rpc;
pub mod runtime;
pub mod security;
pub mod tools;
pub mod types;

pub use self::commands::CommandRouter;
pub use self::config::Config;
pub use self::engine::Engine;
pub use self::inspector::Inspector;
pub use self::tools::ToolSurface;
