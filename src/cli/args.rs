//! Command-line argument definitions (clap derive).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codewatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local multi-workspace source-code indexing and search daemon")]
pub struct Cli {
    /// Path to a config file (defaults to the per-user data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit JSON instead of the compact text encoding
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Run the daemon: watcher, scheduler, writer and the MCP tool surface
    Serve {
        /// Workspace root(s) to index (repeatable; falls back to config/env)
        #[arg(long = "root")]
        roots: Vec<PathBuf>,

        /// Serve MCP over HTTP instead of stdio (requires the http-server feature)
        #[arg(long)]
        http: bool,
    },

    /// Scan every root once, wait for the index to settle, then exit
    ScanOnce {
        #[arg(long = "root")]
        roots: Vec<PathBuf>,

        /// Give up waiting for the pipeline to drain after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },

    /// Run a fresh full scan over the configured roots (staged, then merged)
    Rescan {
        #[arg(long = "root")]
        roots: Vec<PathBuf>,

        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },

    /// Keyword/pattern search across indexed file bodies and symbol names
    Search {
        query: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Treat the query as a regular expression
        #[arg(long)]
        regex: bool,
    },

    /// Search indexed symbols by name
    SearchSymbols {
        query: String,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// List indexed file paths, optionally filtered by repo
    ListFiles {
        #[arg(long)]
        repo: Option<String>,
        #[arg(short, long, default_value_t = 200)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Print a file's stored content by file-key or absolute path
    ReadFile { key: String },

    /// Print a symbol's declaration and body by name
    ReadSymbol { name: String },

    /// List relations where the given symbol is the call target
    GetCallers { name: String },

    /// List extends/implements relations targeting the given symbol
    GetImplementations { name: String },

    /// Bounded call-graph walk from a symbol
    CallGraph {
        name: String,
        #[arg(short, long, default_value_t = 6)]
        depth: u32,
    },

    /// Repos ranked by registered priority
    RepoCandidates {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Index health summary from the on-disk store
    Status,

    /// Diagnostics: dead-letter queue, engine metadata, parse failures
    Doctor {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Force a one-shot re-index of a single file
    IndexFile { path: PathBuf },
}
