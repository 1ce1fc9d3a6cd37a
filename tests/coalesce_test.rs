//! Coalescing law end-to-end: the in-memory queue feeding the worker and
//! the writer, against a real temp workspace and database.

use std::time::Duration;

use codewatch::coalesce::CoalesceQueue;
use codewatch::config::IndexingConfig;
use codewatch::indexing::{IndexWorker, WorkResult};
use codewatch::model::{CoalesceAction, FileKey, RootId};
use codewatch::storage::{db, DbWriter, WriteOp, WriteTask};
use tempfile::TempDir;

fn worker() -> IndexWorker {
    IndexWorker::new(IndexingConfig::default(), 1024 * 1024)
}

fn file_count(conn: &rusqlite::Connection, rel: &str) -> i64 {
    conn.query_row("SELECT count(*) FROM files WHERE rel_path = ?1", [rel], |r| r.get(0))
        .unwrap()
}

/// INDEX then DELETE for one path coalesces into a single DELETE, and
/// one worker pass leaves the `files` row absent.
#[test]
fn delete_coalesced_over_index_commits_an_absent_row() {
    let ws = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("index.db");
    let root_id = RootId::from_normalized_path(&ws.path().to_string_lossy());

    // Pre-existing row, as if x.py had been committed by an earlier pass.
    let conn = db::open_writer(&db_path).unwrap();
    conn.execute(
        "INSERT INTO files (path, rel_path, root_id, repo, mtime, size, content, content_hash, fts_content, last_seen)
         VALUES (?1, 'x.py', ?2, '_root', 1, 1, 'old', 'h', 'old', 1)",
        rusqlite::params![FileKey::new(root_id, "x.py").as_str(), root_id.to_hex()],
    )
    .unwrap();
    drop(conn);

    let queue = CoalesceQueue::new(1000);
    let now = 100;
    queue.push(root_id, "x.py".into(), CoalesceAction::Index, now);
    queue.push(root_id, "x.py".into(), CoalesceAction::Delete, now + 1);
    assert_eq!(queue.len(), 1);

    let task = queue.pop_front().unwrap();
    assert_eq!(task.action, CoalesceAction::Delete);

    // x.py never existed on disk, so the worker resolves the pass to a
    // delete regardless of the coalesced action.
    let result = worker().process(root_id, ws.path(), &task.path, None, task.enqueue_ts, false).unwrap();
    let key = match result {
        WorkResult::Delete(key) => key,
        _ => panic!("expected a delete"),
    };

    let writer_conn = db::open_writer(&db_path).unwrap();
    let writer = DbWriter::start(writer_conn, 50, Duration::from_millis(50), None, 300);
    writer.submit(WriteTask {
        ops: vec![WriteOp::DeletePath(key)],
        enqueue_ts: task.enqueue_ts,
        staging: false,
    });
    assert!(writer.stop(Duration::from_secs(10)));

    let conn = db::open_reader(&db_path).unwrap();
    assert_eq!(file_count(&conn, "x.py"), 0);
}

/// delete-then-index for one path converges to the same state as index
/// alone (up to `last_seen`).
#[test]
fn delete_then_index_equals_index_alone() {
    let ws = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let db_path = data.path().join("index.db");
    let root_id = RootId::from_normalized_path(&ws.path().to_string_lossy());
    std::fs::write(ws.path().join("a.py"), "def alpha():\n    pass\n").unwrap();

    let run = |ops_first_delete: bool| -> (i64, i64, String) {
        let writer_conn = db::open_writer(&db_path).unwrap();
        let writer = DbWriter::start(writer_conn, 50, Duration::from_millis(50), None, 300);
        if ops_first_delete {
            writer.submit(WriteTask {
                ops: vec![WriteOp::DeletePath(FileKey::new(root_id, "a.py"))],
                enqueue_ts: 0,
                staging: false,
            });
        }
        match worker().process(root_id, ws.path(), "a.py", None, 0, false).unwrap() {
            WorkResult::Indexed(task) => writer.submit(task),
            _ => panic!("expected an index"),
        }
        assert!(writer.stop(Duration::from_secs(10)));

        let conn = db::open_reader(&db_path).unwrap();
        let files = file_count(&conn, "a.py");
        let symbols: i64 = conn
            .query_row("SELECT count(*) FROM symbols WHERE path LIKE '%/a.py'", [], |r| r.get(0))
            .unwrap();
        let content: String = conn
            .query_row("SELECT content FROM files WHERE rel_path = 'a.py'", [], |r| r.get(0))
            .unwrap();
        (files, symbols, content)
    };

    let with_delete = run(true);
    let plain = run(false);
    assert_eq!(with_delete, plain);
}

/// Overflow drops new distinct keys but keeps coalescing known ones, and
/// the drop is counted.
#[test]
fn overflow_policy_counts_dropped_keys() {
    let root = RootId::from_normalized_path("/ws");
    let queue = CoalesceQueue::new(2);
    queue.push(root, "a.py".into(), CoalesceAction::Index, 1);
    queue.push(root, "b.py".into(), CoalesceAction::Index, 1);
    queue.push(root, "c.py".into(), CoalesceAction::Index, 1);
    queue.push(root, "a.py".into(), CoalesceAction::Delete, 2);

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.counters().dropped_overflow, 1);
    assert_eq!(queue.pop_front().unwrap().action, CoalesceAction::Delete);
}
