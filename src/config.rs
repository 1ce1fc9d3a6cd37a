//! Layered configuration: figment merges defaults → TOML file →
//! environment variables.

use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub coalescer: CoalescerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_true")]
    pub keep_nested_roots: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerConfig {
    #[serde(default = "default_extensions")]
    pub include_extensions: Vec<String>,
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub use_gitignore: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoalescerConfig {
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_read_priority_penalty_ms")]
    pub read_priority_penalty_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexingConfig {
    #[serde(default = "default_max_parse_bytes")]
    pub max_parse_bytes: u64,
    #[serde(default = "default_max_ast_bytes")]
    pub max_ast_bytes: u64,
    #[serde(default = "default_safety_window_secs")]
    pub safety_window_secs: i64,
    #[serde(default = "default_exclude_content_bytes")]
    pub exclude_content_bytes: u64,
    #[serde(default = "default_true")]
    pub redact_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_engine_max_doc_bytes")]
    pub max_doc_bytes: u64,
    #[serde(default = "default_engine_mem_mb")]
    pub mem_mb: usize,
    #[serde(default = "default_engine_mem_mb")]
    pub index_mem_mb: usize,
    #[serde(default = "default_engine_threads")]
    pub threads: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
    #[serde(default = "default_write_max_wait_ms")]
    pub write_max_wait_ms: u64,
    #[serde(default = "default_engine_retry_secs")]
    pub engine_retry_secs: i64,
    #[serde(default = "default_ttl_days")]
    pub ttl_days_snippets: i64,
    #[serde(default = "default_ttl_days")]
    pub ttl_days_contexts: i64,
    #[serde(default = "default_ttl_days_failed")]
    pub ttl_days_failed_tasks: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_snippet_lines")]
    pub snippet_lines: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpConfig {
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub http: bool,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,
    #[serde(default)]
    pub modules: std::collections::HashMap<String, String>,
}

fn default_true() -> bool {
    true
}
fn default_max_depth() -> usize {
    30
}
fn default_extensions() -> Vec<String> {
    [
        "py", "java", "kt", "ts", "tsx", "js", "jsx", "c", "h", "cc", "cpp", "hpp", "go", "rs",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_exclude_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "target",
        "dist",
        "build",
        "__pycache__",
        ".venv",
        "vendor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_file_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_max_keys() -> usize {
    100_000
}
fn default_drain_timeout_ms() -> u64 {
    2_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_workers() -> usize {
    (num_cpus::get() / 2).clamp(2, 4)
}
fn default_read_priority_penalty_ms() -> u64 {
    20
}
fn default_max_parse_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_max_ast_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_safety_window_secs() -> i64 {
    3
}
fn default_exclude_content_bytes() -> u64 {
    256 * 1024
}
fn default_engine_max_doc_bytes() -> u64 {
    1024 * 1024
}
fn default_engine_mem_mb() -> usize {
    256
}
fn default_engine_threads() -> usize {
    1
}
fn default_db_path() -> PathBuf {
    default_data_dir().join("index.db")
}
fn default_write_batch_size() -> usize {
    50
}
fn default_write_max_wait_ms() -> u64 {
    200
}
fn default_engine_retry_secs() -> i64 {
    300
}
fn default_ttl_days() -> i64 {
    30
}
fn default_ttl_days_failed() -> i64 {
    7
}
fn default_snippet_lines() -> usize {
    5
}
fn default_limit() -> usize {
    20
}
fn default_encoding() -> String {
    "pack1".to_string()
}
fn default_http_port() -> u16 {
    7878
}
fn default_log_level() -> String {
    "warn".to_string()
}

/// The per-user data directory holding `index.db`, the engine index,
/// logs and the default config file.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codewatch")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            follow_symlinks: false,
            keep_nested_roots: false,
            max_depth: default_max_depth(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_extensions: default_extensions(),
            include_globs: Vec::new(),
            exclude_dirs: default_exclude_dirs(),
            exclude_globs: Vec::new(),
            use_gitignore: true,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            max_keys: default_max_keys(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            read_priority_penalty_ms: default_read_priority_penalty_ms(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_parse_bytes: default_max_parse_bytes(),
            max_ast_bytes: default_max_ast_bytes(),
            safety_window_secs: default_safety_window_secs(),
            exclude_content_bytes: default_exclude_content_bytes(),
            redact_enabled: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_doc_bytes: default_engine_max_doc_bytes(),
            mem_mb: default_engine_mem_mb(),
            index_mem_mb: default_engine_mem_mb(),
            threads: default_engine_threads(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            write_batch_size: default_write_batch_size(),
            write_max_wait_ms: default_write_max_wait_ms(),
            engine_retry_secs: default_engine_retry_secs(),
            ttl_days_snippets: default_ttl_days(),
            ttl_days_contexts: default_ttl_days(),
            ttl_days_failed_tasks: default_ttl_days_failed(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            snippet_lines: default_snippet_lines(),
            default_limit: default_limit(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            http: false,
            http_port: default_http_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: std::collections::HashMap::new(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            scanner: ScannerConfig::default(),
            watcher: WatcherConfig::default(),
            coalescer: CoalescerConfig::default(),
            scheduler: SchedulerConfig::default(),
            indexing: IndexingConfig::default(),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
            search: SearchConfig::default(),
            mcp: McpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Load defaults, then an optional TOML file, then bare-name environment
    /// variables.
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }
        let settings: Settings = figment.extract()?;
        Ok(apply_legacy_env(settings))
    }

    pub fn default_config_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }
}

/// The documented environment variable names share no common prefix, so
/// they are applied by hand after the generic figment pass rather than
/// through `Env::prefixed`.
fn apply_legacy_env(mut s: Settings) -> Settings {
    use std::env::var;

    if let Ok(v) = var("INDEX_WORKERS") {
        if let Ok(n) = v.parse() {
            s.scheduler.workers = n;
        }
    }
    if let Ok(v) = var("INDEX_MEM_MB") {
        if let Ok(n) = v.parse::<usize>() {
            s.scheduler.workers = s.scheduler.workers.min((n / 512).max(1));
        }
    }
    if let Ok(v) = var("INDEX_L1_BATCH_SIZE") {
        if let Ok(n) = v.parse() {
            s.storage.write_batch_size = n;
        }
    }
    if let Ok(v) = var("ENGINE_MAX_DOC_BYTES") {
        if let Ok(n) = v.parse() {
            s.engine.max_doc_bytes = n;
        }
    }
    if let Ok(v) = var("ENGINE_MEM_MB") {
        if let Ok(n) = v.parse() {
            s.engine.mem_mb = n;
        }
    }
    if let Ok(v) = var("ENGINE_INDEX_MEM_MB") {
        if let Ok(n) = v.parse() {
            s.engine.index_mem_mb = n;
        }
    }
    if let Ok(v) = var("ENGINE_THREADS") {
        if let Ok(n) = v.parse() {
            s.engine.threads = n;
        }
    }
    if let Ok(v) = var("FOLLOW_SYMLINKS") {
        s.workspace.follow_symlinks = parse_bool(&v);
    }
    if let Ok(v) = var("KEEP_NESTED_ROOTS") {
        s.workspace.keep_nested_roots = parse_bool(&v);
    }
    if let Ok(v) = var("MAX_PARSE_BYTES") {
        if let Ok(n) = v.parse() {
            s.indexing.max_parse_bytes = n;
        }
    }
    if let Ok(v) = var("MAX_AST_BYTES") {
        if let Ok(n) = v.parse() {
            s.indexing.max_ast_bytes = n;
        }
    }
    if let Ok(v) = var("MAX_DEPTH") {
        if let Ok(n) = v.parse() {
            s.workspace.max_depth = n;
        }
    }
    if let Ok(v) = var("REDACT_ENABLED") {
        s.indexing.redact_enabled = parse_bool(&v);
    }
    if let Ok(v) = var("STORAGE_TTL_DAYS_SNIPPETS") {
        if let Ok(n) = v.parse() {
            s.storage.ttl_days_snippets = n;
        }
    }
    if let Ok(v) = var("STORAGE_TTL_DAYS_CONTEXTS") {
        if let Ok(n) = v.parse() {
            s.storage.ttl_days_contexts = n;
        }
    }
    if let Ok(v) = var("STORAGE_TTL_DAYS_FAILED_TASKS") {
        if let Ok(n) = v.parse() {
            s.storage.ttl_days_failed_tasks = n;
        }
    }
    if let Ok(v) = var("ENABLE_FTS") {
        s.engine.enabled = parse_bool(&v);
    }

    let roots = crate::paths::roots_from_env();
    if !roots.is_empty() {
        s.workspace.roots = roots;
    }
    s
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "on")
}
