//! Thin CLI over the same `services`/`search` entry points the MCP tool
//! surface uses. Each read-oriented subcommand opens the
//! SQLite store read-only; there is exactly one implementation of every
//! operation, shared with `mcp`.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};
