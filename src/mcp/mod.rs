//! MCP tool surface: one `rmcp` server
//! exposing `search`, `search_symbols`, `search_api_endpoints`, `list_files`,
//! `read_file`, `read_symbol`, `get_callers`, `get_implementations`,
//! `call_graph`, `repo_candidates`, `status`, `rescan`, `scan_once`,
//! `index_file`, snippet/context CRUD, `doctor` and `sari_guide`.

pub mod guide;
#[cfg(feature = "http-server")]
pub mod http;

use std::sync::Arc;

use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ErrorData as McpError, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};

use crate::daemon::Daemon;
use crate::error::{CoreError, CoreResult, ErrorEnvelope};
use crate::model::RootId;
use crate::presentation::{id_field, text_field, Encoding, Envelope, Record, RecordKind};
use crate::search::TotalMode;
use crate::services;

fn default_limit() -> u32 {
    20
}

fn default_depth() -> u32 {
    6
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub use_regex: bool,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SearchSymbolsRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SearchApiEndpointsRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ListFilesRequest {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct KeyRequest {
    /// A file-key (`<root-id>/<rel-path>`) or an absolute path under a
    /// registered root.
    pub key: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ReadSymbolRequest {
    pub name: String,
    /// Optional file-key (or absolute path) to disambiguate a name that is
    /// declared in more than one file.
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SymbolNameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct CallGraphRequest {
    pub name: String,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct RepoCandidatesRequest {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct RescanRequest {
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SnippetTagRequest {
    pub tag: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SaveSnippetRequest {
    pub tag: String,
    pub key: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct DeleteSnippetRequest {
    pub id: i64,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct DoctorRequest {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct EmptyRequest {}

/// Holds the running daemon and the configured wire encoding; every tool
/// method below does retrieval through `src/services`/`src/search` and
/// renders the result through one shared `Envelope`.
#[derive(Clone)]
pub struct CodewatchServer {
    daemon: Arc<Daemon>,
    encoding: Encoding,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CodewatchServer {
    pub fn new(daemon: Arc<Daemon>, encoding: Encoding) -> Self {
        Self {
            daemon,
            encoding,
            tool_router: Self::tool_router(),
        }
    }

    fn ok(&self, env: Envelope) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(env.encode(self.encoding))]))
    }

    fn err(&self, tool: &str, err: CoreError) -> Result<CallToolResult, McpError> {
        let envelope: ErrorEnvelope = (&err).into();
        let env = Envelope::new(tool, false)
            .with_kv("code", envelope.code)
            .push(Record {
                kind: RecordKind::Error,
                fields: vec![text_field("message", envelope.message)],
            });
        Ok(CallToolResult::success(vec![Content::text(env.encode(self.encoding))]))
    }

    fn resolve_key(&self, raw: &str) -> CoreResult<crate::model::FileKey> {
        services::resolve_key(self.daemon.roots(), raw)
    }

    #[tool(description = "Usage guide: read this first when unsure which tool to call next")]
    pub async fn sari_guide(&self, _req: Parameters<EmptyRequest>) -> Result<CallToolResult, McpError> {
        let env = Envelope::new("sari_guide", true).push(Record {
            kind: RecordKind::Content,
            fields: vec![text_field("text", guide::GUIDE_TEXT)],
        });
        self.ok(env)
    }

    #[tool(description = "Daemon/index/engine status: queue depths, last commit time, engine readiness")]
    pub async fn status(&self, _req: Parameters<EmptyRequest>) -> Result<CallToolResult, McpError> {
        let status = self.daemon.status();
        let env = Envelope::new("status", true)
            .with_kv("roots", status.roots.to_string())
            .with_kv("coalesce_depth", status.coalesce_depth.to_string())
            .with_kv("scheduler_depth", status.scheduler_depth.to_string())
            .with_kv("queue_db_writer", status.queue_db_writer.to_string())
            .with_kv("batches_committed", status.batches_committed.to_string())
            .with_kv("tasks_committed", status.tasks_committed.to_string())
            .with_kv("tasks_failed", status.tasks_failed.to_string())
            .with_kv("last_commit_ts", status.last_commit_ts.to_string())
            .with_kv("last_batch_latency_ms", status.last_batch_latency_ms.to_string())
            .with_kv("engine_ready", status.engine_ready.to_string());
        self.ok(env)
    }

    #[tool(description = "Diagnose index health: queue depths, engine readiness, and the dead-letter queue")]
    pub async fn doctor(&self, req: Parameters<DoctorRequest>) -> Result<CallToolResult, McpError> {
        let DoctorRequest { limit } = req.0;
        let status = self.daemon.status();
        let conn = self.daemon.reader();
        match services::failed_tasks(&conn, limit as usize) {
            Ok(entries) => {
                let total = entries.len();
                let mut env = Envelope::new("doctor", true)
                    .with_kv("coalesce_depth", status.coalesce_depth.to_string())
                    .with_kv("scheduler_depth", status.scheduler_depth.to_string())
                    .with_kv("engine_ready", status.engine_ready.to_string())
                    .with_paging(total, total, TotalMode::Exact);
                for e in entries {
                    env = env.push(Record {
                        kind: RecordKind::Record,
                        fields: vec![
                            id_field("path", e.path),
                            id_field("attempts", e.attempts.to_string()),
                            text_field("error", e.error),
                            id_field("next_retry", e.next_retry.to_string()),
                        ],
                    });
                }
                self.ok(env)
            }
            Err(e) => self.err("doctor", e),
        }
    }

    #[tool(description = "Keyword/pattern search across indexed file bodies and symbol names")]
    pub async fn search(&self, req: Parameters<SearchRequest>) -> Result<CallToolResult, McpError> {
        let SearchRequest { query, limit, offset, use_regex } = req.0;
        let conn = self.daemon.reader();
        let engine = self.daemon.engine();
        let opts = crate::search::SearchOptions {
            limit: limit as usize,
            offset: offset as usize,
            use_regex,
            snippet_lines: self.daemon_snippet_lines(),
        };
        match crate::search::search(&conn, engine.as_ref(), &query, &opts) {
            Ok(result) => {
                let returned = result.hits.len();
                let mut env = Envelope::new("search", true).with_paging(returned, result.total, result.total_mode);
                if result.meta.fallback_used {
                    env = env.with_kv("fallback_used", "true");
                }
                if let Some(reason) = &result.meta.degraded_reason {
                    env = env.with_kv("degraded_reason", reason.clone());
                }
                if let Some(err) = &result.meta.regex_error {
                    env = env.with_kv("regex_error", err.clone());
                }
                let truncated = result.total > offset as usize + returned;
                for hit in result.hits {
                    let mut fields = vec![
                        id_field("path", hit.path),
                        id_field("repo", hit.repo),
                        id_field("line", hit.line.to_string()),
                        id_field("score", format!("{:.4}", hit.score)),
                    ];
                    if let Some(symbol) = hit.symbol {
                        fields.push(id_field("symbol", symbol));
                    }
                    fields.push(text_field("snippet", hit.snippet.join("\n")));
                    env = env.push(Record { kind: RecordKind::Record, fields });
                }
                if truncated {
                    env = env.with_truncation(false, offset as usize + returned, limit as usize);
                }
                self.ok(env)
            }
            Err(e) => self.err("search", e),
        }
    }

    #[tool(description = "Search indexed symbols (classes, functions, methods...) by name")]
    pub async fn search_symbols(&self, req: Parameters<SearchSymbolsRequest>) -> Result<CallToolResult, McpError> {
        let SearchSymbolsRequest { query, limit, offset } = req.0;
        let conn = self.daemon.reader();
        match crate::search::search_symbols(&conn, &query, limit as usize, offset as usize) {
            Ok(rows) => {
                let total = rows.len();
                let mut env = Envelope::new("search_symbols", true).with_paging(total, total, TotalMode::Exact);
                for (name, path, line) in rows {
                    env = env.push(Record {
                        kind: RecordKind::Header,
                        fields: vec![id_field("name", name), id_field("path", path), id_field("line", line.to_string())],
                    });
                }
                self.ok(env)
            }
            Err(e) => self.err("search_symbols", e),
        }
    }

    #[tool(description = "Search symbols whose metadata carries an HTTP route (API endpoint discovery)")]
    pub async fn search_api_endpoints(&self, req: Parameters<SearchApiEndpointsRequest>) -> Result<CallToolResult, McpError> {
        let SearchApiEndpointsRequest { query, limit } = req.0;
        let conn = self.daemon.reader();
        match services::search_api_endpoints(&conn, &query, limit as usize) {
            Ok(rows) => {
                let total = rows.len();
                let mut env = Envelope::new("search_api_endpoints", true).with_paging(total, total, TotalMode::Exact);
                for ep in rows {
                    env = env.push(Record {
                        kind: RecordKind::Record,
                        fields: vec![
                            id_field("symbol", ep.symbol),
                            id_field("path", ep.path),
                            id_field("http_path", ep.http_path),
                            id_field("http_methods", ep.http_methods.join(",")),
                            id_field("line", ep.line.to_string()),
                        ],
                    });
                }
                self.ok(env)
            }
            Err(e) => self.err("search_api_endpoints", e),
        }
    }

    #[tool(description = "List indexed file paths, optionally filtered by repo")]
    pub async fn list_files(&self, req: Parameters<ListFilesRequest>) -> Result<CallToolResult, McpError> {
        let ListFilesRequest { repo, limit, offset } = req.0;
        let conn = self.daemon.reader();
        match crate::search::list_files(&conn, repo.as_deref(), limit as usize, offset as usize) {
            Ok((paths, total, total_mode)) => {
                let returned = paths.len();
                let mut env = Envelope::new("list_files", true).with_paging(returned, total, total_mode);
                for p in paths {
                    env = env.push(Record { kind: RecordKind::Path, fields: vec![id_field("path", p)] });
                }
                if total > offset as usize + returned {
                    env = env.with_truncation(false, offset as usize + returned, limit as usize);
                }
                self.ok(env)
            }
            Err(e) => self.err("list_files", e),
        }
    }

    #[tool(description = "Read a file's stored content by file-key or absolute path")]
    pub async fn read_file(&self, req: Parameters<KeyRequest>) -> Result<CallToolResult, McpError> {
        let key = match self.resolve_key(&req.0.key) {
            Ok(k) => k,
            Err(e) => return self.err("read_file", e),
        };
        let conn = self.daemon.reader();
        match services::read_file(&conn, &key) {
            Ok(file) => {
                let env = Envelope::new("read_file", true)
                    .with_kv("path", file.path)
                    .with_kv("repo", file.repo)
                    .with_kv("mtime", file.mtime.to_string())
                    .push(Record { kind: RecordKind::Content, fields: vec![text_field("content", file.content)] });
                self.ok(env)
            }
            Err(e) => self.err("read_file", e),
        }
    }

    #[tool(description = "Read a symbol's declaration and body by name")]
    pub async fn read_symbol(&self, req: Parameters<ReadSymbolRequest>) -> Result<CallToolResult, McpError> {
        let key = match req.0.key.as_deref().map(|raw| self.resolve_key(raw)).transpose() {
            Ok(k) => k,
            Err(e) => return self.err("read_symbol", e),
        };
        let conn = self.daemon.reader();
        match services::read_symbol(&conn, &req.0.name, key.as_ref()) {
            Ok(records) => {
                let total = records.len();
                let mut env = Envelope::new("read_symbol", true).with_paging(total, total, TotalMode::Exact);
                for r in records {
                    env = env.push(Record {
                        kind: RecordKind::SymbolBlock,
                        fields: vec![
                            id_field("name", r.name),
                            id_field("kind", r.kind),
                            id_field("path", r.path),
                            id_field("start_line", r.start_line.to_string()),
                            id_field("end_line", r.end_line.to_string()),
                            text_field("body", r.body),
                        ],
                    });
                }
                self.ok(env)
            }
            Err(e) => self.err("read_symbol", e),
        }
    }

    #[tool(description = "List relations where the given symbol is the call target")]
    pub async fn get_callers(&self, req: Parameters<SymbolNameRequest>) -> Result<CallToolResult, McpError> {
        self.relations("get_callers", &req.0.name, services::get_callers)
    }

    #[tool(description = "List extends/implements relations targeting the given symbol")]
    pub async fn get_implementations(&self, req: Parameters<SymbolNameRequest>) -> Result<CallToolResult, McpError> {
        self.relations("get_implementations", &req.0.name, services::get_implementations)
    }

    fn relations(
        &self,
        tool: &str,
        name: &str,
        f: impl FnOnce(&rusqlite::Connection, &str) -> CoreResult<Vec<services::RelationRecord>>,
    ) -> Result<CallToolResult, McpError> {
        let conn = self.daemon.reader();
        match f(&conn, name) {
            Ok(rows) => {
                let total = rows.len();
                let mut env = Envelope::new(tool, true).with_paging(total, total, TotalMode::Exact);
                for r in rows {
                    env = env.push(Record {
                        kind: RecordKind::Record,
                        fields: vec![
                            id_field("from_symbol", r.from_symbol),
                            id_field("from_path", r.from_path),
                            id_field("to_symbol", r.to_symbol),
                            id_field("kind", r.kind),
                            id_field("line", r.line.to_string()),
                        ],
                    });
                }
                self.ok(env)
            }
            Err(e) => self.err(tool, e),
        }
    }

    #[tool(description = "Bounded call graph walk (both directions) from a symbol")]
    pub async fn call_graph(&self, req: Parameters<CallGraphRequest>) -> Result<CallToolResult, McpError> {
        let CallGraphRequest { name, depth } = req.0;
        let conn = self.daemon.reader();
        match services::call_graph(&conn, &name, Some(depth), None) {
            Ok(graph) => {
                let total = graph.edges.len();
                let mut env = Envelope::new("call_graph", true)
                    .with_kv("truncated", graph.truncated.to_string())
                    .with_paging(total, total, if graph.truncated { TotalMode::Approx } else { TotalMode::Exact });
                for edge in graph.edges {
                    env = env.push(Record {
                        kind: RecordKind::Record,
                        fields: vec![id_field("from", edge.from), id_field("to", edge.to), id_field("depth", edge.depth.to_string())],
                    });
                }
                self.ok(env)
            }
            Err(e) => self.err("call_graph", e),
        }
    }

    #[tool(description = "Repos most relevant to the workspace, ranked by registered priority")]
    pub async fn repo_candidates(&self, req: Parameters<RepoCandidatesRequest>) -> Result<CallToolResult, McpError> {
        let conn = self.daemon.reader();
        match services::repo_candidates(&conn, req.0.limit as usize) {
            Ok(repos) => {
                let total = repos.len();
                let mut env = Envelope::new("repo_candidates", true).with_paging(total, total, TotalMode::Exact);
                for r in repos {
                    env = env.push(Record {
                        kind: RecordKind::Record,
                        fields: vec![
                            id_field("repo", r.repo_name),
                            text_field("tags", r.tags),
                            id_field("domain", r.domain),
                            text_field("description", r.description),
                            id_field("priority", r.priority.to_string()),
                        ],
                    });
                }
                self.ok(env)
            }
            Err(e) => self.err("repo_candidates", e),
        }
    }

    #[tool(description = "Force a re-index of one file by file-key or absolute path")]
    pub async fn index_file(&self, req: Parameters<KeyRequest>) -> Result<CallToolResult, McpError> {
        let key = match self.resolve_key(&req.0.key) {
            Ok(k) => k,
            Err(e) => return self.err("index_file", e),
        };
        let Some(root_id) = key.root_id() else {
            return self.err("index_file", CoreError::InvalidArgs(format!("malformed file key: {key}")));
        };
        match self.daemon.index_file(root_id, key.rel_path()) {
            Ok(()) => self.ok(Envelope::new("index_file", true).with_kv("path", key.to_string())),
            Err(e) => self.err("index_file", e),
        }
    }

    #[tool(description = "Trigger a full re-scan of one root (or every root) of a running daemon")]
    pub async fn rescan(&self, req: Parameters<RescanRequest>) -> Result<CallToolResult, McpError> {
        let root_id = match req.0.root.as_deref().map(RootId::from_hex) {
            Some(Some(id)) => Some(id),
            Some(None) => return self.err("rescan", CoreError::InvalidArgs("malformed root id".into())),
            None => None,
        };
        match self.daemon.rescan(root_id) {
            Ok(()) => self.ok(Envelope::new("rescan", true)),
            Err(e) => self.err("rescan", e),
        }
    }

    #[tool(description = "Save a tagged code range for later recall (snippet or archived context)")]
    pub async fn save_snippet(&self, req: Parameters<SaveSnippetRequest>) -> Result<CallToolResult, McpError> {
        let SaveSnippetRequest { tag, key, start_line, end_line, content } = req.0;
        let key = match self.resolve_key(&key) {
            Ok(k) => k,
            Err(e) => return self.err("save_snippet", e),
        };
        let conn = self.daemon.aux_writer();
        let now = crate::model::now_unix();
        match services::upsert_snippet(&conn, &tag, &key, start_line, end_line, &content, now) {
            Ok(id) => self.ok(Envelope::new("save_snippet", true).with_kv("id", id.to_string())),
            Err(e) => self.err("save_snippet", e),
        }
    }

    #[tool(description = "List saved snippets for a tag")]
    pub async fn get_snippet(&self, req: Parameters<SnippetTagRequest>) -> Result<CallToolResult, McpError> {
        self.list_tagged("get_snippet", &req.0.tag)
    }

    #[tool(description = "Save a tagged domain-context note (same storage as snippets)")]
    pub async fn archive_context(&self, req: Parameters<SaveSnippetRequest>) -> Result<CallToolResult, McpError> {
        let SaveSnippetRequest { tag, key, start_line, end_line, content } = req.0;
        let key = match self.resolve_key(&key) {
            Ok(k) => k,
            Err(e) => return self.err("archive_context", e),
        };
        let conn = self.daemon.aux_writer();
        let now = crate::model::now_unix();
        let ctx_tag = format!("ctx:{tag}");
        match services::upsert_snippet(&conn, &ctx_tag, &key, start_line, end_line, &content, now) {
            Ok(id) => self.ok(Envelope::new("archive_context", true).with_kv("id", id.to_string())),
            Err(e) => self.err("archive_context", e),
        }
    }

    #[tool(description = "List saved context notes for a tag")]
    pub async fn get_context(&self, req: Parameters<SnippetTagRequest>) -> Result<CallToolResult, McpError> {
        let ctx_tag = format!("ctx:{}", req.0.tag);
        self.list_tagged("get_context", &ctx_tag)
    }

    fn list_tagged(&self, tool: &str, tag: &str) -> Result<CallToolResult, McpError> {
        let conn = self.daemon.reader();
        match services::list_snippets(&conn, tag) {
            Ok(rows) => {
                let total = rows.len();
                let mut env = Envelope::new(tool, true).with_paging(total, total, TotalMode::Exact);
                for s in rows {
                    env = env.push(Record {
                        kind: RecordKind::Record,
                        fields: vec![
                            id_field("id", s.id.to_string()),
                            id_field("path", s.path.to_string()),
                            id_field("start_line", s.start_line.to_string()),
                            id_field("end_line", s.end_line.to_string()),
                            text_field("content", s.content),
                        ],
                    });
                }
                self.ok(env)
            }
            Err(e) => self.err(tool, e),
        }
    }

    #[tool(description = "Delete a saved snippet or context note by id")]
    pub async fn delete_snippet(&self, req: Parameters<DeleteSnippetRequest>) -> Result<CallToolResult, McpError> {
        let conn = self.daemon.aux_writer();
        match services::delete_snippet(&conn, req.0.id) {
            Ok(found) => self.ok(Envelope::new("delete_snippet", true).with_kv("deleted", found.to_string())),
            Err(e) => self.err("delete_snippet", e),
        }
    }

    #[tool(description = "Run a synchronous one-shot scan of every registered root, then return")]
    pub async fn scan_once(&self, _req: Parameters<EmptyRequest>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.daemon.rescan(None) {
            return self.err("scan_once", e);
        }
        let daemon = std::sync::Arc::clone(&self.daemon);
        let drained = tokio::task::spawn_blocking(move || {
            daemon.wait_until_idle(std::time::Duration::from_secs(300))
        })
        .await
        .unwrap_or(false);
        self.ok(Envelope::new("scan_once", true).with_kv("drained", drained.to_string()))
    }

    fn daemon_snippet_lines(&self) -> usize {
        self.daemon.settings().search.snippet_lines
    }
}

#[tool_handler]
impl ServerHandler for CodewatchServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::default();
        server_info.name = "codewatch".to_string();
        server_info.version = env!("CARGO_PKG_VERSION").to_string();
        server_info.title = Some("Codewatch Code Indexing Daemon".to_string());
        server_info.website_url = Some("https://github.com/codewatch-dev/codewatch".to_string());
        server_info.icons = None;

        let mut info = ServerInfo::default();
        info.protocol_version = ProtocolVersion::V_2024_11_05;
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info.instructions = Some(
            "Search-first workflow: call `sari_guide` if unsure, otherwise start with \
            `status` and `repo_candidates`/`list_files`, then `search`/`search_symbols`/\
            `search_api_endpoints` before ever calling `read_file`. Use `get_callers`, \
            `get_implementations`, and `call_graph` for impact analysis, and `doctor` to \
            diagnose index/engine problems."
                .to_string(),
        );
        info
    }
}
