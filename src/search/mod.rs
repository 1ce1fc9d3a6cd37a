//! Hybrid search: parse the query, retrieve through the
//! external engine when ready, else SQL FTS, else `LIKE` (or a dedicated
//! regex path on request); merge symbol-name hits with body hits; rank and
//! cap. Degraded retrieval is never an error: the result carries
//! `fallback_used`/`degraded_reason` meta instead.

pub mod query;
pub mod rank;
pub mod snippet;

use std::collections::HashMap;

use rusqlite::Connection;

use crate::error::CoreResult;
use crate::storage::EngineAdapter;

pub use query::{parse_query, ParsedQuery};

const SEARCH_RESULT_CAP: usize = 20;
const SYMBOL_SEARCH_CAP: usize = 50;
const LIST_FILES_CAP: usize = 200;
/// Upper bound on rows pulled per retrieval strategy before ranking; past
/// this the reported total degrades to approx.
const RETRIEVAL_SCAN_CAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalMode {
    /// The count reflects every matching row.
    Exact,
    /// The count was cut short by a retrieval-path limit (engine top-k,
    /// scan cap, regex) and should be read as a lower bound.
    Approx,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub path: String,
    pub repo: String,
    pub symbol: Option<String>,
    pub is_symbol_definition: bool,
    pub line: u32,
    pub mtime: i64,
    pub score: f64,
    pub snippet: Vec<String>,
}

/// Degradation flags surfaced to callers.
#[derive(Debug, Clone, Default)]
pub struct SearchMeta {
    pub fallback_used: bool,
    pub degraded_reason: Option<String>,
    pub regex_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub total: usize,
    pub total_mode: TotalMode,
    pub meta: SearchMeta,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub offset: usize,
    pub use_regex: bool,
    pub snippet_lines: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: SEARCH_RESULT_CAP,
            offset: 0,
            use_regex: false,
            snippet_lines: 5,
        }
    }
}

struct Candidate {
    path: String,
    repo: String,
    content: String,
    mtime: i64,
    symbol: Option<String>,
    is_symbol_definition: bool,
    path_substring: bool,
}

/// Runs the full retrieval → rank → snippet pipeline for one query string.
pub fn search(
    conn: &Connection,
    engine: &dyn EngineAdapter,
    raw_query: &str,
    opts: &SearchOptions,
) -> CoreResult<SearchResult> {
    let parsed = parse_query(raw_query);
    let cap = opts.limit.min(SEARCH_RESULT_CAP).max(1);
    let mut meta = SearchMeta::default();

    let mut candidates: HashMap<String, Candidate> = HashMap::new();
    let mut total_mode = TotalMode::Exact;

    if opts.use_regex {
        // Regex is its own retrieval path; a syntactically invalid pattern
        // yields an empty result plus `regex_error`, never a hard error.
        match regex::Regex::new(raw_query) {
            Ok(re) => {
                body_candidates_via_regex(conn, &re, &mut candidates)?;
                total_mode = TotalMode::Approx;
            }
            Err(e) => {
                meta.regex_error = Some(e.to_string());
                return Ok(SearchResult {
                    hits: Vec::new(),
                    total: 0,
                    total_mode: TotalMode::Approx,
                    meta,
                });
            }
        }
    } else {
        symbol_candidates(conn, &parsed, &mut candidates)?;

        let status = engine.status();
        if status.ready && !parsed.bypass_fts {
            match engine.search(&parsed.normalized, cap * 4) {
                Ok((hits, _)) if !hits.is_empty() => {
                    total_mode = TotalMode::Approx;
                    body_candidates_from_keys(conn, hits.iter().map(|h| h.doc_id.as_str()), &parsed, &mut candidates)?;
                }
                Ok(_) => {
                    body_candidates_via_like(conn, &parsed, &mut candidates)?;
                }
                Err(e) => {
                    meta.fallback_used = true;
                    meta.degraded_reason = Some(format!("engine: {e}"));
                    body_candidates_via_like(conn, &parsed, &mut candidates)?;
                }
            }
        } else if !parsed.bypass_fts {
            match body_candidates_via_fts(conn, &parsed, &mut candidates) {
                Ok(()) => {}
                Err(e) => {
                    meta.fallback_used = true;
                    meta.degraded_reason = Some(format!("fts: {e}"));
                    body_candidates_via_like(conn, &parsed, &mut candidates)?;
                }
            }
        } else {
            body_candidates_via_like(conn, &parsed, &mut candidates)?;
        }
    }

    let today = crate::model::now_unix();
    let repo_priorities = repo_priorities(conn)?;
    let mut scored: Vec<(f64, Candidate)> = candidates
        .into_values()
        .map(|c| {
            let mtime_days = ((today - c.mtime).max(0)) as f64 / 86_400.0;
            let basename = c.path.rsplit('/').next().unwrap_or(&c.path);
            let basename_exact = parsed
                .terms
                .iter()
                .any(|t| basename.eq_ignore_ascii_case(t));
            let score = rank::score(&rank::RankInputs {
                basename_exact,
                path_substring: c.path_substring,
                is_symbol_definition: c.is_symbol_definition,
                age_days: mtime_days,
                repo_priority: repo_priorities.get(&c.repo).copied().unwrap_or(0),
                path: c.path.clone(),
            });
            (score, c)
        })
        .collect();

    scored.sort_by(|(sa, ca), (sb, cb)| rank::cmp_hits(*sa, ca.mtime, &ca.path, *sb, cb.mtime, &cb.path));

    let total = scored.len();
    if total > cap + opts.offset {
        total_mode = TotalMode::Approx;
    }

    let terms_for_snippet: Vec<String> = if opts.use_regex {
        vec![raw_query.to_string()]
    } else {
        parsed.terms.iter().cloned().chain(parsed.phrases.iter().cloned()).collect()
    };
    let hits = scored
        .into_iter()
        .skip(opts.offset)
        .take(cap)
        .map(|(score, c)| {
            let snip = snippet::generate(&c.content, &terms_for_snippet, opts.snippet_lines);
            SearchHit {
                path: c.path,
                repo: c.repo,
                symbol: c.symbol,
                is_symbol_definition: c.is_symbol_definition,
                line: snip.first_line,
                mtime: c.mtime,
                score,
                snippet: snip.lines,
            }
        })
        .collect();

    Ok(SearchResult { hits, total, total_mode, meta })
}

fn repo_priorities(conn: &Connection) -> CoreResult<HashMap<String, i64>> {
    let mut stmt = conn.prepare("SELECT repo_name, priority FROM repo_meta WHERE priority != 0")?;
    let mut rows = stmt.query([])?;
    let mut out = HashMap::new();
    while let Some(row) = rows.next()? {
        out.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)?);
    }
    Ok(out)
}

fn symbol_candidates(conn: &Connection, parsed: &ParsedQuery, out: &mut HashMap<String, Candidate>) -> CoreResult<()> {
    if parsed.terms.is_empty() {
        return Ok(());
    }
    let mut stmt = conn.prepare(
        "SELECT s.name, f.path, f.repo, f.content, f.mtime
         FROM symbols s JOIN files f ON f.path = s.path
         WHERE s.symbol_name_lc LIKE ?1 ESCAPE '^' LIMIT 200",
    )?;
    for term in &parsed.terms {
        let pattern = query::like_pattern(&term.to_lowercase());
        let mut rows = stmt.query([&pattern])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let path: String = row.get(1)?;
            let repo: String = row.get(2)?;
            let content: String = row.get(3)?;
            let mtime: i64 = row.get(4)?;
            out.entry(path.clone()).or_insert(Candidate {
                path,
                repo,
                content,
                mtime,
                symbol: Some(name),
                is_symbol_definition: true,
                path_substring: false,
            });
        }
    }
    Ok(())
}

fn body_candidates_via_fts(conn: &Connection, parsed: &ParsedQuery, out: &mut HashMap<String, Candidate>) -> CoreResult<()> {
    let match_expr = fts_match_expr(parsed);
    if match_expr.is_empty() {
        return Ok(());
    }
    let mut stmt = conn.prepare(
        "SELECT f.path, f.repo, f.content, f.mtime
         FROM files_fts JOIN files f ON f.path = files_fts.path
         WHERE files_fts MATCH ?1 LIMIT 200",
    )?;
    let mut rows = stmt.query([&match_expr])?;
    while let Some(row) = rows.next()? {
        insert_body_row(row, parsed, out)?;
    }
    Ok(())
}

/// Conjunctive FTS expression: `AND` between every phrase and term.
fn fts_match_expr(parsed: &ParsedQuery) -> String {
    let mut parts = Vec::new();
    for phrase in &parsed.phrases {
        parts.push(format!("\"{}\"", phrase.replace('"', "")));
    }
    for term in &parsed.terms {
        parts.push(format!("\"{}\"", term.replace('"', "")));
    }
    parts.join(" AND ")
}

fn body_candidates_via_like(conn: &Connection, parsed: &ParsedQuery, out: &mut HashMap<String, Candidate>) -> CoreResult<()> {
    let needles: Vec<String> = parsed.terms.iter().cloned().chain(parsed.phrases.iter().cloned()).collect();
    if needles.is_empty() {
        return Ok(());
    }
    let mut stmt = conn.prepare(
        "SELECT path, repo, content, mtime FROM files WHERE fts_content LIKE ?1 ESCAPE '^' LIMIT 200",
    )?;
    for needle in &needles {
        let pattern = query::like_pattern(needle);
        let mut rows = stmt.query([&pattern])?;
        while let Some(row) = rows.next()? {
            insert_body_row(row, parsed, out)?;
        }
    }
    Ok(())
}

fn body_candidates_via_regex(conn: &Connection, re: &regex::Regex, out: &mut HashMap<String, Candidate>) -> CoreResult<()> {
    let mut stmt = conn.prepare("SELECT path, repo, content, mtime, fts_content FROM files")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if out.len() >= RETRIEVAL_SCAN_CAP {
            break;
        }
        let fts_content: String = row.get(4)?;
        if !re.is_match(&fts_content) {
            continue;
        }
        let path: String = row.get(0)?;
        out.entry(path.clone()).or_insert(Candidate {
            path,
            repo: row.get(1)?,
            content: row.get(2)?,
            mtime: row.get(3)?,
            symbol: None,
            is_symbol_definition: false,
            path_substring: false,
        });
    }
    Ok(())
}

fn body_candidates_from_keys<'a>(
    conn: &Connection,
    doc_ids: impl Iterator<Item = &'a str>,
    parsed: &ParsedQuery,
    out: &mut HashMap<String, Candidate>,
) -> CoreResult<()> {
    let mut stmt = conn.prepare("SELECT path, repo, content, mtime FROM files WHERE path = ?1")?;
    for doc_id in doc_ids {
        let mut rows = stmt.query([doc_id])?;
        while let Some(row) = rows.next()? {
            insert_body_row(row, parsed, out)?;
        }
    }
    Ok(())
}

fn insert_body_row(row: &rusqlite::Row<'_>, parsed: &ParsedQuery, out: &mut HashMap<String, Candidate>) -> CoreResult<()> {
    let path: String = row.get(0)?;
    let repo: String = row.get(1)?;
    let content: String = row.get(2)?;
    let mtime: i64 = row.get(3)?;
    let path_substring = parsed.terms.iter().any(|t| path.to_lowercase().contains(&t.to_lowercase()));
    out.entry(path.clone()).or_insert(Candidate {
        path,
        repo,
        content,
        mtime,
        symbol: None,
        is_symbol_definition: false,
        path_substring,
    });
    Ok(())
}

/// Lists indexed files under `repo_filter` (or all repos), capped at 200.
pub fn list_files(
    conn: &Connection,
    repo_filter: Option<&str>,
    limit: usize,
    offset: usize,
) -> CoreResult<(Vec<String>, usize, TotalMode)> {
    let cap = limit.min(LIST_FILES_CAP).max(1);
    let mut paths = Vec::new();
    let mut stmt = match repo_filter {
        Some(_) => conn.prepare("SELECT rel_path FROM files WHERE repo = ?1 ORDER BY rel_path")?,
        None => conn.prepare("SELECT rel_path FROM files ORDER BY rel_path")?,
    };
    let mut rows = match repo_filter {
        Some(repo) => stmt.query([repo])?,
        None => stmt.query([])?,
    };
    let mut total = 0usize;
    while let Some(row) = rows.next()? {
        total += 1;
        if total > offset && paths.len() < cap {
            paths.push(row.get::<_, String>(0)?);
        }
    }
    let mode = if total > offset + cap { TotalMode::Approx } else { TotalMode::Exact };
    Ok((paths, total, mode))
}

/// Symbol-name search (exact or substring), capped at 50.
pub fn search_symbols(
    conn: &Connection,
    name_query: &str,
    limit: usize,
    offset: usize,
) -> CoreResult<Vec<(String, String, u32)>> {
    let cap = limit.min(SYMBOL_SEARCH_CAP).max(1);
    let pattern = query::like_pattern(&name_query.to_lowercase());
    let mut stmt = conn.prepare(
        "SELECT name, path, line FROM symbols WHERE symbol_name_lc LIKE ?1 ESCAPE '^' \
         ORDER BY name, path, line LIMIT ?2 OFFSET ?3",
    )?;
    let mut rows = stmt.query(rusqlite::params![pattern, cap as i64, offset as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? as u32));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NullEngine;

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
             VALUES ('r1/models.py', 'models.py', 'r1', 'r1', 1000, 10, 'class Widget:\n    def build(self):\n        pass', 'h1', 'class Widget:\n    def build(self):\n        pass', 1000)",
            [],
        ).unwrap();
        conn.execute(
            "INSERT INTO files_fts (path, rel_path, fts_content)
             VALUES ('r1/models.py', 'models.py', 'class Widget:\n    def build(self):\n        pass')",
            [],
        ).unwrap();
        conn.execute(
            "INSERT INTO symbols (symbol_id, path, root_id, name, kind, line, end_line, content, symbol_name_lc)
             VALUES (1, 'r1/models.py', 'r1', 'Widget', 'class', 1, 3, 'class Widget:', 'widget')",
            [],
        ).unwrap();
        conn
    }

    fn opts() -> SearchOptions {
        SearchOptions { limit: 20, offset: 0, use_regex: false, snippet_lines: 5 }
    }

    #[test]
    fn symbol_definition_hit_outranks_nothing_when_alone() {
        let conn = setup();
        let result = search(&conn, &NullEngine, "widget", &opts()).unwrap();
        assert_eq!(result.hits.len(), 1);
        assert!(result.hits[0].is_symbol_definition);
        assert_eq!(result.total_mode, TotalMode::Exact);
        assert!(!result.meta.fallback_used);
    }

    #[test]
    fn invalid_regex_returns_empty_with_regex_error() {
        let conn = setup();
        let o = SearchOptions { use_regex: true, ..opts() };
        let result = search(&conn, &NullEngine, "[", &o).unwrap();
        assert!(result.hits.is_empty());
        assert!(result.meta.regex_error.is_some());
    }

    #[test]
    fn regex_path_matches_body_content() {
        let conn = setup();
        let o = SearchOptions { use_regex: true, ..opts() };
        let result = search(&conn, &NullEngine, r"def \w+\(self\)", &o).unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.total_mode, TotalMode::Approx);
    }

    #[test]
    fn short_query_uses_like_without_crashing() {
        let conn = setup();
        let result = search(&conn, &NullEngine, "Wi", &opts()).unwrap();
        assert_eq!(result.hits.len(), 1);
    }

    #[test]
    fn list_files_returns_registered_paths() {
        let conn = setup();
        let (paths, total, mode) = list_files(&conn, None, 200, 0).unwrap();
        assert_eq!(paths, vec!["models.py".to_string()]);
        assert_eq!(total, 1);
        assert_eq!(mode, TotalMode::Exact);
    }

    #[test]
    fn search_symbols_matches_by_substring() {
        let conn = setup();
        let hits = search_symbols(&conn, "idg", 50, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "Widget");
    }
}
