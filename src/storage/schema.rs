//! Relational schema: versioned `PRAGMA user_version` gate over
//! idempotent `CREATE TABLE IF NOT EXISTS` migrations.

use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 1;

pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA busy_timeout = 5000;

        CREATE TABLE IF NOT EXISTS roots (
            root_id     TEXT PRIMARY KEY,
            root_path   TEXT NOT NULL UNIQUE,
            real_path   TEXT NOT NULL,
            label       TEXT NOT NULL,
            created_ts  INTEGER NOT NULL,
            updated_ts  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS files (
            path            TEXT PRIMARY KEY,
            rel_path        TEXT NOT NULL,
            root_id         TEXT NOT NULL REFERENCES roots(root_id),
            repo            TEXT NOT NULL,
            mtime           INTEGER NOT NULL,
            size            INTEGER NOT NULL,
            content         TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            fts_content     TEXT NOT NULL,
            last_seen       INTEGER NOT NULL,
            flags           INTEGER NOT NULL DEFAULT 0,
            parse_status    TEXT NOT NULL DEFAULT 'skipped',
            parse_reason    TEXT NOT NULL DEFAULT '',
            ast_status      TEXT NOT NULL DEFAULT 'skipped',
            ast_reason      TEXT NOT NULL DEFAULT '',
            is_binary       INTEGER NOT NULL DEFAULT 0,
            is_minified     INTEGER NOT NULL DEFAULT 0,
            deleted         INTEGER NOT NULL DEFAULT 0,
            content_bytes   INTEGER NOT NULL DEFAULT 0,
            metadata_json   TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_files_root ON files(root_id);
        CREATE INDEX IF NOT EXISTS idx_files_repo ON files(repo);
        CREATE INDEX IF NOT EXISTS idx_files_last_seen ON files(last_seen);

        CREATE TABLE IF NOT EXISTS staging_files (
            path            TEXT PRIMARY KEY,
            rel_path        TEXT NOT NULL,
            root_id         TEXT NOT NULL,
            repo            TEXT NOT NULL,
            mtime           INTEGER NOT NULL,
            size            INTEGER NOT NULL,
            content         TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            fts_content     TEXT NOT NULL,
            last_seen       INTEGER NOT NULL,
            flags           INTEGER NOT NULL DEFAULT 0,
            parse_status    TEXT NOT NULL DEFAULT 'skipped',
            parse_reason    TEXT NOT NULL DEFAULT '',
            ast_status      TEXT NOT NULL DEFAULT 'skipped',
            ast_reason      TEXT NOT NULL DEFAULT '',
            is_binary       INTEGER NOT NULL DEFAULT 0,
            is_minified     INTEGER NOT NULL DEFAULT 0,
            deleted         INTEGER NOT NULL DEFAULT 0,
            content_bytes   INTEGER NOT NULL DEFAULT 0,
            metadata_json   TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS symbols (
            symbol_id       INTEGER PRIMARY KEY,
            path            TEXT NOT NULL REFERENCES files(path),
            root_id         TEXT NOT NULL,
            name            TEXT NOT NULL,
            kind            TEXT NOT NULL,
            line            INTEGER NOT NULL,
            end_line        INTEGER NOT NULL,
            content         TEXT NOT NULL DEFAULT '',
            parent          TEXT,
            metadata_json   TEXT NOT NULL DEFAULT '{}',
            docstring       TEXT,
            symbol_name_lc  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_symbols_path ON symbols(path);
        CREATE INDEX IF NOT EXISTS idx_symbols_name_lc ON symbols(symbol_name_lc);
        CREATE INDEX IF NOT EXISTS idx_symbols_root ON symbols(root_id);

        CREATE TABLE IF NOT EXISTS symbol_relations (
            from_path       TEXT NOT NULL,
            from_root_id    TEXT NOT NULL,
            from_symbol     TEXT NOT NULL,
            from_symbol_id  INTEGER NOT NULL,
            to_path         TEXT,
            to_root_id      TEXT,
            to_symbol       TEXT NOT NULL,
            to_symbol_id    INTEGER,
            rel_type        TEXT NOT NULL,
            line            INTEGER NOT NULL,
            metadata_json   TEXT NOT NULL DEFAULT '{}',
            UNIQUE(from_path, from_symbol_id, to_symbol, rel_type, line)
        );
        CREATE INDEX IF NOT EXISTS idx_relations_from ON symbol_relations(from_symbol);
        CREATE INDEX IF NOT EXISTS idx_relations_to ON symbol_relations(to_symbol);
        CREATE INDEX IF NOT EXISTS idx_relations_path ON symbol_relations(from_path);

        CREATE TABLE IF NOT EXISTS repo_meta (
            repo_name   TEXT PRIMARY KEY,
            tags        TEXT NOT NULL DEFAULT '',
            domain      TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            priority    INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS snippets (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            tag             TEXT NOT NULL,
            path            TEXT NOT NULL,
            root_id         TEXT NOT NULL,
            start_line      INTEGER NOT NULL,
            end_line        INTEGER NOT NULL,
            content         TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            created_ts      INTEGER NOT NULL,
            updated_ts      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snippets_tag ON snippets(tag);

        CREATE TABLE IF NOT EXISTS failed_tasks (
            path            TEXT NOT NULL,
            root_id         TEXT NOT NULL,
            attempts        INTEGER NOT NULL DEFAULT 0,
            error           TEXT NOT NULL DEFAULT '',
            ts              INTEGER NOT NULL,
            next_retry      INTEGER NOT NULL,
            payload_json    TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (path, root_id)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
            path UNINDEXED,
            rel_path,
            fts_content
        );
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        apply(&conn).unwrap();
        let v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(v, SCHEMA_VERSION);
    }

    #[test]
    fn core_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        for table in ["roots", "files", "symbols", "symbol_relations", "repo_meta", "snippets", "failed_tasks"] {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
