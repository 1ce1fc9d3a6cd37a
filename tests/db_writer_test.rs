//! Writer-thread behavior: batch commit shape, dead-lettering on engine
//! failure, dead-letter replay, and the staging merge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codewatch::error::{CoreError, CoreResult};
use codewatch::model::{
    FileFlags, FileKey, FileRecord, ParseStatus, Relation, RelationKind, RootId, Symbol, SymbolId, SymbolKind,
    SymbolMetadata,
};
use codewatch::storage::engine::{EngineAdapter, EngineHit, EngineStatus};
use codewatch::storage::{db, DbWriter, WriteOp, WriteTask};
use tempfile::TempDir;

fn record(root_id: RootId, rel: &str, content: &str, last_seen: i64) -> FileRecord {
    FileRecord {
        key: FileKey::new(root_id, rel),
        rel_path: rel.to_string(),
        root_id,
        repo: "_root".to_string(),
        mtime: last_seen,
        size: content.len() as i64,
        content: content.to_string(),
        content_hash: format!("h-{rel}"),
        fts_content: content.to_string(),
        last_seen,
        flags: FileFlags::empty(),
        parse_status: ParseStatus::Ok,
        parse_reason: String::new(),
        ast_status: ParseStatus::Ok,
        ast_reason: String::new(),
        content_bytes: content.len() as i64,
        metadata_json: "{}".to_string(),
    }
}

fn symbol(key: &FileKey, root_id: RootId, name: &str, line: u32) -> Symbol {
    Symbol {
        id: SymbolId::compute(key, SymbolKind::Function, name, line),
        file: key.clone(),
        root_id,
        name: name.to_string(),
        kind: SymbolKind::Function,
        start_line: line,
        end_line: line + 1,
        content: format!("def {name}():"),
        parent: None,
        docstring: None,
        metadata: SymbolMetadata::default(),
    }
}

#[test]
fn one_task_commits_files_symbols_and_relations_together() {
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("index.db");
    let root_id = RootId::from_normalized_path("/ws");
    let key = FileKey::new(root_id, "a.py");

    let writer = DbWriter::start(db::open_writer(&db_path).unwrap(), 50, Duration::from_millis(50), None, 300);
    let caller = symbol(&key, root_id, "alpha", 1);
    writer.submit(WriteTask {
        ops: vec![
            WriteOp::UpsertFile(record(root_id, "a.py", "def alpha():\n    beta()\n", 100)),
            WriteOp::UpsertSymbols { file: key.clone(), root_id, symbols: vec![caller.clone()] },
            WriteOp::UpsertRelations {
                file: key.clone(),
                relations: vec![Relation {
                    from_file: key.clone(),
                    from_root_id: root_id,
                    from_symbol: "alpha".to_string(),
                    from_symbol_id: caller.id,
                    to_file: None,
                    to_root_id: None,
                    to_symbol: "beta".to_string(),
                    to_symbol_id: None,
                    kind: RelationKind::Calls,
                    line: 2,
                }],
            },
        ],
        enqueue_ts: 100,
        staging: false,
    });
    assert!(writer.stop(Duration::from_secs(10)));

    let conn = db::open_reader(&db_path).unwrap();
    let q = |sql: &str| -> i64 { conn.query_row(sql, [], |r| r.get(0)).unwrap() };
    assert_eq!(q("SELECT count(*) FROM files"), 1);
    assert_eq!(q("SELECT count(*) FROM symbols"), 1);
    assert_eq!(q("SELECT count(*) FROM symbol_relations"), 1);
    assert_eq!(q("SELECT count(*) FROM files_fts"), 1);
}

#[test]
fn reindex_replaces_symbols_wholesale() {
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("index.db");
    let root_id = RootId::from_normalized_path("/ws");
    let key = FileKey::new(root_id, "a.py");

    let writer = DbWriter::start(db::open_writer(&db_path).unwrap(), 50, Duration::from_millis(50), None, 300);
    writer.submit(WriteTask {
        ops: vec![
            WriteOp::UpsertFile(record(root_id, "a.py", "def old(): pass", 100)),
            WriteOp::UpsertSymbols { file: key.clone(), root_id, symbols: vec![symbol(&key, root_id, "old", 1)] },
        ],
        enqueue_ts: 100,
        staging: false,
    });
    writer.submit(WriteTask {
        ops: vec![
            WriteOp::UpsertFile(record(root_id, "a.py", "def new(): pass", 200)),
            WriteOp::UpsertSymbols { file: key.clone(), root_id, symbols: vec![symbol(&key, root_id, "new", 1)] },
        ],
        enqueue_ts: 200,
        staging: false,
    });
    assert!(writer.stop(Duration::from_secs(10)));

    let conn = db::open_reader(&db_path).unwrap();
    let names: Vec<String> = conn
        .prepare("SELECT name FROM symbols ORDER BY name")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(names, vec!["new".to_string()]);
}

/// Engine adapter that always fails, for exercising the DLQ path.
struct BrokenEngine;

impl EngineAdapter for BrokenEngine {
    fn upsert_documents(&self, _docs: &[FileRecord]) -> CoreResult<()> {
        Err(CoreError::EngineUnavailable { reason: "wire down".to_string() })
    }
    fn delete_documents(&self, _ids: &[FileKey]) -> CoreResult<()> {
        Err(CoreError::EngineUnavailable { reason: "wire down".to_string() })
    }
    fn search(&self, _query: &str, _limit: usize) -> CoreResult<(Vec<EngineHit>, EngineStatus)> {
        Err(CoreError::EngineUnavailable { reason: "wire down".to_string() })
    }
    fn status(&self) -> EngineStatus {
        EngineStatus {
            ready: true,
            version: "test".to_string(),
            doc_count: 0,
            reason: String::new(),
            hint: String::new(),
        }
    }
}

/// Engine adapter that records successful upserts.
struct RecordingEngine {
    touched: Arc<AtomicBool>,
}

impl EngineAdapter for RecordingEngine {
    fn upsert_documents(&self, docs: &[FileRecord]) -> CoreResult<()> {
        if !docs.is_empty() {
            self.touched.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
    fn delete_documents(&self, _ids: &[FileKey]) -> CoreResult<()> {
        Ok(())
    }
    fn search(&self, _query: &str, _limit: usize) -> CoreResult<(Vec<EngineHit>, EngineStatus)> {
        Ok((Vec::new(), self.status()))
    }
    fn status(&self) -> EngineStatus {
        EngineStatus {
            ready: true,
            version: "test".to_string(),
            doc_count: 0,
            reason: String::new(),
            hint: String::new(),
        }
    }
}

#[test]
fn engine_failure_dead_letters_without_rolling_back_sql() {
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("index.db");
    let root_id = RootId::from_normalized_path("/ws");

    let writer = DbWriter::start(
        db::open_writer(&db_path).unwrap(),
        50,
        Duration::from_millis(50),
        Some(Arc::new(BrokenEngine)),
        300,
    );
    writer.submit(WriteTask {
        ops: vec![WriteOp::UpsertFile(record(root_id, "a.py", "body", 100))],
        enqueue_ts: 100,
        staging: false,
    });
    assert!(writer.stop(Duration::from_secs(10)));

    let conn = db::open_reader(&db_path).unwrap();
    // SQL row committed despite the engine failure...
    let files: i64 = conn.query_row("SELECT count(*) FROM files", [], |r| r.get(0)).unwrap();
    assert_eq!(files, 1);
    // ...and the path landed in the dead-letter queue with a future retry.
    let (attempts, next_retry): (i64, i64) = conn
        .query_row("SELECT attempts, next_retry FROM failed_tasks", [], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap();
    assert!(attempts >= 1);
    assert!(next_retry > 0);
}

#[test]
fn dead_letter_replay_clears_the_queue_on_success() {
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("index.db");
    let root_id = RootId::from_normalized_path("/ws");
    let key = FileKey::new(root_id, "a.py");

    // First pass: broken engine dead-letters the path.
    let writer = DbWriter::start(
        db::open_writer(&db_path).unwrap(),
        50,
        Duration::from_millis(50),
        Some(Arc::new(BrokenEngine)),
        300,
    );
    writer.submit(WriteTask {
        ops: vec![WriteOp::UpsertFile(record(root_id, "a.py", "body", 100))],
        enqueue_ts: 100,
        staging: false,
    });
    assert!(writer.stop(Duration::from_secs(10)));

    // Second pass: a healthy engine replays the dead letter.
    let touched = Arc::new(AtomicBool::new(false));
    let writer = DbWriter::start(
        db::open_writer(&db_path).unwrap(),
        50,
        Duration::from_millis(50),
        Some(Arc::new(RecordingEngine { touched: Arc::clone(&touched) })),
        300,
    );
    writer.submit(WriteTask {
        ops: vec![WriteOp::EngineResync { file: key }],
        enqueue_ts: 200,
        staging: false,
    });
    assert!(writer.stop(Duration::from_secs(10)));

    assert!(touched.load(Ordering::SeqCst));
    let conn = db::open_reader(&db_path).unwrap();
    let dlq: i64 = conn.query_row("SELECT count(*) FROM failed_tasks", [], |r| r.get(0)).unwrap();
    assert_eq!(dlq, 0);
}

#[test]
fn staging_merge_upserts_and_prunes_by_last_seen() {
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("index.db");
    let root_id = RootId::from_normalized_path("/ws");

    let writer = DbWriter::start(db::open_writer(&db_path).unwrap(), 50, Duration::from_millis(50), None, 300);
    // Pre-scan live rows: one that the scan will refresh, one that it won't.
    writer.submit(WriteTask {
        ops: vec![
            WriteOp::UpsertFile(record(root_id, "keep.py", "kept", 50)),
            WriteOp::UpsertFile(record(root_id, "gone.py", "dropped", 50)),
        ],
        enqueue_ts: 50,
        staging: false,
    });
    // The scan: keep.py unchanged (a last_seen refresh), fresh.py new
    // (staged), gone.py untouched.
    writer.submit(WriteTask {
        ops: vec![WriteOp::UpdateLastSeen { file: FileKey::new(root_id, "keep.py"), ts: 150 }],
        enqueue_ts: 150,
        staging: true,
    });
    writer.submit(WriteTask {
        ops: vec![WriteOp::UpsertFile(record(root_id, "fresh.py", "new file", 150))],
        enqueue_ts: 150,
        staging: true,
    });
    writer.submit(WriteTask {
        ops: vec![WriteOp::MergeStaging { root_id, scan_started_ts: 100 }],
        enqueue_ts: 151,
        staging: false,
    });
    assert!(writer.stop(Duration::from_secs(10)));

    let conn = db::open_reader(&db_path).unwrap();
    let rels: Vec<String> = conn
        .prepare("SELECT rel_path FROM files ORDER BY rel_path")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rels, vec!["fresh.py".to_string(), "keep.py".to_string()]);

    // The FTS mirror was rebuilt to match the merged rows.
    let fts: i64 = conn.query_row("SELECT count(*) FROM files_fts", [], |r| r.get(0)).unwrap();
    assert_eq!(fts, 2);
}
