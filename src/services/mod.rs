//! Read Services: file/symbol retrieval, relation
//! lookups and the bounded call graph walk. Every query here is read-only
//! against the live tables the writer maintains.

use std::collections::{HashSet, VecDeque};

use rusqlite::Connection;
use sha2::Digest;

use crate::error::{CoreError, CoreResult};
use crate::model::{FileKey, RepoMeta, RootId};

const CALL_GRAPH_MAX_DEPTH: u32 = 6;
const CALL_GRAPH_MAX_NODES: usize = 200;
const REPO_CANDIDATES_CAP: usize = 50;
const API_ENDPOINTS_CAP: usize = 100;

#[derive(Debug, Clone)]
pub struct FileContent {
    pub path: String,
    pub repo: String,
    pub content: String,
    pub mtime: i64,
}

#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub name: String,
    pub kind: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub parent: Option<String>,
    pub docstring: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct RelationRecord {
    pub from_symbol: String,
    pub from_path: String,
    pub to_symbol: String,
    pub to_path: Option<String>,
    pub kind: String,
    pub line: u32,
}

/// Resolves a `read_file`/`index_file`-style argument that may be either a
/// file-key (`<root-id>/<rel-path>`) or an absolute filesystem path against
/// the registered roots.
pub fn resolve_key(roots: &[(RootId, std::path::PathBuf)], raw: &str) -> CoreResult<FileKey> {
    if let Some((prefix, rel)) = raw.split_once('/') {
        if RootId::from_hex(prefix).is_some_and(|id| roots.iter().any(|(r, _)| *r == id)) {
            return Ok(FileKey(raw.to_string()));
        }
        let _ = rel;
    }

    let path = std::path::Path::new(raw);
    let root_id = crate::paths::require_in_scope(path, roots)?;
    let root_path = roots.iter().find(|(id, _)| *id == root_id).map(|(_, p)| p.clone()).unwrap();
    let rel = path
        .strip_prefix(&root_path)
        .map_err(|_| CoreError::InvalidArgs(format!("'{raw}' is not under its resolved root")))?;
    Ok(FileKey::new(root_id, &crate::model::to_forward_slash(rel)))
}

pub fn read_file(conn: &Connection, key: &FileKey) -> CoreResult<FileContent> {
    conn.query_row(
        "SELECT rel_path, repo, content, mtime FROM files WHERE path = ?1",
        [key.as_str()],
        |row| {
            Ok(FileContent {
                path: row.get(0)?,
                repo: row.get(1)?,
                content: row.get(2)?,
                mtime: row.get(3)?,
            })
        },
    )
    .map_err(|_| CoreError::NotIndexed(key.to_string()))
}

/// Resolves a symbol name to every matching definition.
pub fn read_symbol(conn: &Connection, name: &str, key: Option<&FileKey>) -> CoreResult<Vec<SymbolRecord>> {
    let mut stmt = conn.prepare(
        "SELECT s.name, s.kind, s.path, s.line, s.end_line, s.parent, s.docstring, f.content
         FROM symbols s JOIN files f ON f.path = s.path
         WHERE s.name = ?1 AND (?2 IS NULL OR s.path = ?2)",
    )?;
    let mut rows = stmt.query(rusqlite::params![name, key.map(|k| k.as_str().to_string())])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let start_line: i64 = row.get(3)?;
        let mut end_line: i64 = row.get(4)?;
        let content: String = row.get(7)?;
        let total_lines = content.lines().count() as i64;

        // Legacy records may carry `end_line = 0` (symbol closed at EOF
        // before the parser tracked a real close line); fall back to a
        // 10-line window capped at the file's end.
        if end_line <= 0 {
            end_line = (start_line + 10).min(total_lines.max(start_line));
        }

        let body = extract_lines(&content, start_line as u32, end_line as u32);
        out.push(SymbolRecord {
            name: row.get(0)?,
            kind: row.get(1)?,
            path: row.get(2)?,
            start_line: start_line as u32,
            end_line: end_line as u32,
            parent: row.get(5)?,
            docstring: row.get(6)?,
            body,
        });
    }
    if out.is_empty() {
        return Err(CoreError::NotIndexed(name.to_string()));
    }
    Ok(out)
}

fn extract_lines(content: &str, start_line: u32, end_line: u32) -> String {
    content
        .lines()
        .enumerate()
        .filter(|(i, _)| {
            let line_no = *i as u32 + 1;
            line_no >= start_line.max(1) && line_no <= end_line.max(start_line)
        })
        .map(|(_, l)| l)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn get_callers(conn: &Connection, symbol_name: &str) -> CoreResult<Vec<RelationRecord>> {
    relations_where(conn, "to_symbol = ?1 AND rel_type = 'calls'", symbol_name)
}

pub fn get_implementations(conn: &Connection, symbol_name: &str) -> CoreResult<Vec<RelationRecord>> {
    relations_where(conn, "to_symbol = ?1 AND rel_type IN ('extends', 'implements')", symbol_name)
}

fn relations_where(conn: &Connection, predicate: &str, symbol_name: &str) -> CoreResult<Vec<RelationRecord>> {
    let sql = format!(
        "SELECT from_symbol, from_path, to_symbol, to_path, rel_type, line FROM symbol_relations WHERE {predicate}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([symbol_name])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(RelationRecord {
            from_symbol: row.get(0)?,
            from_path: row.get(1)?,
            to_symbol: row.get(2)?,
            to_path: row.get(3)?,
            kind: row.get(4)?,
            line: row.get::<_, i64>(5)? as u32,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct CallGraphEdge {
    pub from: String,
    pub to: String,
    pub depth: u32,
}

#[derive(Debug, Clone)]
pub struct CallGraph {
    pub edges: Vec<CallGraphEdge>,
    pub truncated: bool,
}

/// Breadth-first walk over `calls` edges starting at `root_symbol`, bounded
/// by both depth and total node count.
pub fn call_graph(conn: &Connection, root_symbol: &str, max_depth: Option<u32>, max_nodes: Option<usize>) -> CoreResult<CallGraph> {
    let max_depth = max_depth.unwrap_or(CALL_GRAPH_MAX_DEPTH).min(CALL_GRAPH_MAX_DEPTH);
    let max_nodes = max_nodes.unwrap_or(CALL_GRAPH_MAX_NODES).min(CALL_GRAPH_MAX_NODES);

    let mut stmt = conn.prepare("SELECT to_symbol FROM symbol_relations WHERE from_symbol = ?1 AND rel_type = 'calls'")?;

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root_symbol.to_string());
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((root_symbol.to_string(), 0));
    let mut edges = Vec::new();
    let mut truncated = false;

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let mut rows = stmt.query([&current])?;
        while let Some(row) = rows.next()? {
            let callee: String = row.get(0)?;
            if visited.len() >= max_nodes {
                truncated = true;
                break;
            }
            edges.push(CallGraphEdge {
                from: current.clone(),
                to: callee.clone(),
                depth: depth + 1,
            });
            if visited.insert(callee.clone()) {
                queue.push_back((callee, depth + 1));
            }
        }
    }

    Ok(CallGraph { edges, truncated })
}

/// Repos ordered by `repo_meta.priority`, falling
/// back to alphabetical for repos with no registered metadata.
pub fn repo_candidates(conn: &Connection, limit: usize) -> CoreResult<Vec<RepoMeta>> {
    let limit = limit.min(REPO_CANDIDATES_CAP);
    let mut stmt = conn.prepare(
        "SELECT repo_name, tags, domain, description, priority FROM repo_meta
         ORDER BY priority DESC, repo_name ASC LIMIT ?1",
    )?;
    let mut rows = stmt.query([limit as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(RepoMeta {
            repo_name: row.get(0)?,
            tags: row.get(1)?,
            domain: row.get(2)?,
            description: row.get(3)?,
            priority: row.get(4)?,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    pub symbol: String,
    pub path: String,
    pub http_path: String,
    pub http_methods: Vec<String>,
    pub line: u32,
}

/// Symbols whose `metadata_json.http_path` is set.
pub fn search_api_endpoints(conn: &Connection, query: &str, limit: usize) -> CoreResult<Vec<ApiEndpoint>> {
    let limit = limit.min(API_ENDPOINTS_CAP);
    let like = format!("%{}%", query.to_lowercase());
    let mut stmt = conn.prepare(
        "SELECT name, path, line, metadata_json FROM symbols
         WHERE json_extract(metadata_json, '$.http_path') IS NOT NULL
           AND (lower(json_extract(metadata_json, '$.http_path')) LIKE ?1 OR lower(name) LIKE ?1)
         ORDER BY path, line LIMIT ?2",
    )?;
    let mut rows = stmt.query(rusqlite::params![like, limit as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let metadata_json: String = row.get(3)?;
        let metadata: crate::model::SymbolMetadata = serde_json::from_str(&metadata_json).unwrap_or_default();
        out.push(ApiEndpoint {
            symbol: row.get(0)?,
            path: row.get(1)?,
            http_path: metadata.http_path.unwrap_or_default(),
            http_methods: metadata.http_methods,
            line: row.get::<_, i64>(2)? as u32,
        });
    }
    Ok(out)
}

/// Create-or-update a tagged code range.
pub fn upsert_snippet(
    conn: &Connection,
    tag: &str,
    key: &FileKey,
    start_line: u32,
    end_line: u32,
    content: &str,
    now: i64,
) -> CoreResult<i64> {
    let root_id = key.root_id().ok_or_else(|| CoreError::InvalidArgs(format!("malformed file key: {key}")))?;
    let content_hash = format!("{:x}", sha2::Sha256::digest(content.as_bytes()));
    conn.execute(
        "INSERT INTO snippets (tag, path, root_id, start_line, end_line, content, content_hash, created_ts, updated_ts)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?8)",
        rusqlite::params![tag, key.as_str(), root_id.to_hex(), start_line, end_line, content, content_hash, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_snippets(conn: &Connection, tag: &str) -> CoreResult<Vec<crate::model::Snippet>> {
    let mut stmt = conn.prepare(
        "SELECT id, tag, path, root_id, start_line, end_line, content, content_hash, created_ts, updated_ts
         FROM snippets WHERE tag = ?1 ORDER BY created_ts DESC",
    )?;
    let mut rows = stmt.query([tag])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let root_id = RootId::from_hex(&row.get::<_, String>(3)?).unwrap_or(RootId([0; 8]));
        out.push(crate::model::Snippet {
            id: row.get(0)?,
            tag: row.get(1)?,
            path: FileKey(row.get(2)?),
            root_id,
            start_line: row.get::<_, i64>(4)? as u32,
            end_line: row.get::<_, i64>(5)? as u32,
            content: row.get(6)?,
            content_hash: row.get(7)?,
            created_ts: row.get(8)?,
            updated_ts: row.get(9)?,
        });
    }
    Ok(out)
}

pub fn delete_snippet(conn: &Connection, id: i64) -> CoreResult<bool> {
    let n = conn.execute("DELETE FROM snippets WHERE id = ?1", [id])?;
    Ok(n > 0)
}

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub path: String,
    pub attempts: u32,
    pub error: String,
    pub next_retry: i64,
}

/// Feeds `doctor` with the dead-letter queue contents.
pub fn failed_tasks(conn: &Connection, limit: usize) -> CoreResult<Vec<DeadLetterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT path, attempts, error, next_retry FROM failed_tasks ORDER BY ts DESC LIMIT ?1",
    )?;
    let mut rows = stmt.query([limit as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(DeadLetterEntry {
            path: row.get(0)?,
            attempts: row.get::<_, i64>(1)? as u32,
            error: row.get(2)?,
            next_retry: row.get(3)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::schema::apply(&conn).unwrap();
        conn.execute(
            "INSERT INTO roots (root_id, root_path, real_path, label, created_ts, updated_ts)
             VALUES ('r1', '/r1', '/r1', 'r1', 1, 1)",
            [],
        ).unwrap();
        conn.execute(
            "INSERT INTO files (path, rel_path, root_id, repo, mtime, size, content, content_hash, fts_content, last_seen)
             VALUES ('r1/a.py', 'a.py', 'r1', 'r1', 1, 1, 'def a():\n    b()\ndef b():\n    pass', 'h', 'x', 1)",
            [],
        ).unwrap();
        conn.execute(
            "INSERT INTO symbols (symbol_id, path, root_id, name, kind, line, end_line, content, symbol_name_lc)
             VALUES (1, 'r1/a.py', 'r1', 'a', 'function', 1, 2, 'def a():', 'a')",
            [],
        ).unwrap();
        conn.execute(
            "INSERT INTO symbols (symbol_id, path, root_id, name, kind, line, end_line, content, symbol_name_lc)
             VALUES (2, 'r1/a.py', 'r1', 'b', 'function', 3, 4, 'def b():', 'b')",
            [],
        ).unwrap();
        conn.execute(
            "INSERT INTO symbol_relations (from_path, from_root_id, from_symbol, from_symbol_id, to_symbol, rel_type, line)
             VALUES ('r1/a.py', 'r1', 'a', 1, 'b', 'calls', 2)",
            [],
        ).unwrap();
        conn
    }

    #[test]
    fn read_symbol_extracts_its_line_range() {
        let conn = setup();
        let hits = read_symbol(&conn, "a", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].body, "def a():\n    b()");
    }

    #[test]
    fn get_callers_finds_the_calling_symbol() {
        let conn = setup();
        let callers = get_callers(&conn, "b").unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].from_symbol, "a");
    }

    #[test]
    fn call_graph_follows_calls_edges() {
        let conn = setup();
        let graph = call_graph(&conn, "a", None, None).unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].to, "b");
        assert!(!graph.truncated);
    }

    #[test]
    fn unknown_symbol_is_not_indexed() {
        let conn = setup();
        assert!(read_symbol(&conn, "missing", None).is_err());
    }

    #[test]
    fn repo_candidates_orders_by_priority_then_name() {
        let conn = setup();
        conn.execute(
            "INSERT INTO repo_meta (repo_name, priority) VALUES ('low', 1), ('high', 5)",
            [],
        )
        .unwrap();
        let repos = repo_candidates(&conn, 10).unwrap();
        assert_eq!(repos[0].repo_name, "high");
    }

    #[test]
    fn search_api_endpoints_matches_route_path() {
        let conn = setup();
        conn.execute(
            "INSERT INTO symbols (symbol_id, path, root_id, name, kind, line, end_line, content, metadata_json, symbol_name_lc)
             VALUES (3, 'r1/a.py', 'r1', 'list_users', 'function', 10, 12, 'def list_users():',
             '{\"http_path\": \"/users\", \"http_methods\": [\"GET\"]}', 'list_users')",
            [],
        )
        .unwrap();
        let hits = search_api_endpoints(&conn, "users", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].http_methods, vec!["GET"]);
    }

    #[test]
    fn snippet_round_trips_through_create_list_delete() {
        let conn = setup();
        let key = FileKey("r1/a.py".to_string());
        let id = upsert_snippet(&conn, "ctx:review", &key, 1, 2, "def a():", 100).unwrap();
        let found = list_snippets(&conn, "ctx:review").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert!(delete_snippet(&conn, id).unwrap());
        assert!(list_snippets(&conn, "ctx:review").unwrap().is_empty());
    }
}
