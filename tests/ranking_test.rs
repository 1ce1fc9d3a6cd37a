//! Search degradation and output-cap behavior against a hand-seeded store:
//! no daemon, just the schema, the search engine and a few rows.

use codewatch::search::{self, SearchOptions, TotalMode};
use codewatch::storage::{schema, NullEngine};
use rusqlite::Connection;

fn seeded() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    schema::apply(&conn).unwrap();
    conn.execute(
        "INSERT INTO files (path, rel_path, root_id, repo, mtime, size, content, content_hash, fts_content, last_seen)
         VALUES ('r1/notes.py', 'notes.py', 'r1', 'r1', 1000, 20, 'secret keyword here', 'h1', 'secret keyword here', 1000)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO files_fts (path, rel_path, fts_content) VALUES ('r1/notes.py', 'notes.py', 'secret keyword here')",
        [],
    )
    .unwrap();
    conn
}

fn opts() -> SearchOptions {
    SearchOptions { limit: 10, offset: 0, use_regex: false, snippet_lines: 5 }
}

#[test]
fn fts_failure_falls_back_to_like_and_is_marked() {
    let conn = seeded();
    conn.execute_batch("DROP TABLE files_fts;").unwrap();

    let result = search::search(&conn, &NullEngine, "secret", &opts()).unwrap();
    assert_eq!(result.hits.len(), 1);
    assert!(result.hits[0].path.ends_with("notes.py"));
    assert!(result.meta.fallback_used);
    assert!(result.meta.degraded_reason.is_some());
}

#[test]
fn snippet_line_cap_holds_for_pathological_lines() {
    let conn = seeded();
    let long_line = format!("prefix AAAA {}", "x".repeat(5000));
    conn.execute(
        "INSERT INTO files (path, rel_path, root_id, repo, mtime, size, content, content_hash, fts_content, last_seen)
         VALUES ('r1/big.py', 'big.py', 'r1', 'r1', 1000, 5000, ?1, 'h2', ?1, 1000)",
        [&long_line],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO files_fts (path, rel_path, fts_content) VALUES ('r1/big.py', 'big.py', ?1)",
        [&long_line],
    )
    .unwrap();

    let result = search::search(&conn, &NullEngine, "AAAA", &opts()).unwrap();
    let hit = result.hits.iter().find(|h| h.path.ends_with("big.py")).unwrap();
    assert_eq!(hit.snippet.len(), 1);
    let body = hit.snippet[0].splitn(2, ':').nth(1).unwrap();
    let visible: String = body.chars().filter(|c| *c != '\u{2039}' && *c != '\u{203a}').collect();
    assert!(visible.chars().count() <= 120, "snippet line too long: {}", visible.len());
    assert!(visible.contains("AAAA"));
}

#[test]
fn unclosed_bracket_regex_reports_error_not_crash() {
    let conn = seeded();
    let o = SearchOptions { use_regex: true, ..opts() };
    let result = search::search(&conn, &NullEngine, "[", &o).unwrap();
    assert!(result.hits.is_empty());
    assert!(result.meta.regex_error.is_some());
    assert_eq!(result.total_mode, TotalMode::Approx);
}

#[test]
fn cjk_only_query_uses_like_path() {
    let conn = seeded();
    conn.execute(
        "INSERT INTO files (path, rel_path, root_id, repo, mtime, size, content, content_hash, fts_content, last_seen)
         VALUES ('r1/cjk.py', 'cjk.py', 'r1', 'r1', 1000, 10, '検索エンジン', 'h3', '検索エンジン', 1000)",
        [],
    )
    .unwrap();
    let result = search::search(&conn, &NullEngine, "検索", &opts()).unwrap();
    assert_eq!(result.hits.len(), 1);
    assert!(result.hits[0].path.ends_with("cjk.py"));
}

#[test]
fn search_caps_hits_at_twenty_and_reports_approx() {
    let conn = seeded();
    for i in 0..30 {
        conn.execute(
            "INSERT INTO files (path, rel_path, root_id, repo, mtime, size, content, content_hash, fts_content, last_seen)
             VALUES (?1, ?2, 'r1', 'r1', 1000, 10, 'shared needle text', ?3, 'shared needle text', 1000)",
            rusqlite::params![format!("r1/f{i}.py"), format!("f{i}.py"), format!("h{i}")],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO files_fts (path, rel_path, fts_content) VALUES (?1, ?2, 'shared needle text')",
            rusqlite::params![format!("r1/f{i}.py"), format!("f{i}.py")],
        )
        .unwrap();
    }

    let o = SearchOptions { limit: 100, ..opts() };
    let result = search::search(&conn, &NullEngine, "needle", &o).unwrap();
    assert!(result.hits.len() <= 20);
    assert_eq!(result.total, 30);
    assert_eq!(result.total_mode, TotalMode::Approx);

    // Offset pagination walks the remainder with a deterministic order.
    let second_page = search::search(&conn, &NullEngine, "needle", &SearchOptions { limit: 100, offset: 20, ..opts() }).unwrap();
    assert_eq!(second_page.hits.len(), 10);
    let first_paths: Vec<_> = result.hits.iter().map(|h| h.path.clone()).collect();
    assert!(second_page.hits.iter().all(|h| !first_paths.contains(&h.path)));
}
