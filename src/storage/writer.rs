//! Single-writer batched transaction thread: one queue, one thread,
//! `BEGIN` → fixed-order batch → `COMMIT`, rollback-and-retry-individually
//! on batch failure, engine sync after commit with dead-lettering on
//! engine failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rusqlite::{params, Connection};

use crate::model::{FileKey, FileRecord, Relation, RepoMeta, RootId, Symbol};

use super::engine::EngineAdapter;

#[derive(Debug)]
pub enum WriteOp {
    DeletePath(FileKey),
    UpsertFile(FileRecord),
    UpsertSymbols { file: FileKey, root_id: RootId, symbols: Vec<Symbol> },
    UpsertRelations { file: FileKey, relations: Vec<Relation> },
    UpdateLastSeen { file: FileKey, ts: i64 },
    UpsertRepoMeta(RepoMeta),
    DlqClear { file: FileKey },
    /// Re-attempt the external-engine sync for a dead-lettered path. The SQL
    /// row is already consistent; only
    /// the engine document is replayed, and the DLQ row cleared on success.
    EngineResync { file: FileKey },
    /// Atomic staging swap for one root, run as its own transaction after
    /// every task queued before it has committed.
    MergeStaging { root_id: RootId, scan_started_ts: i64 },
}

pub struct WriteTask {
    pub ops: Vec<WriteOp>,
    pub enqueue_ts: i64,
    /// Route through `staging_files` instead of `files`.
    pub staging: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriterCounters {
    pub batches_committed: u64,
    pub tasks_committed: u64,
    pub tasks_failed: u64,
    pub dropped_on_shutdown: u64,
    pub last_commit_ts: i64,
    pub last_batch_latency_ms: u64,
    pub queue_depth: usize,
}

pub struct DbWriter {
    tx: Sender<WriteTask>,
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
    counters: Arc<Mutex<WriterCounters>>,
    queue_len: Arc<std::sync::atomic::AtomicUsize>,
    throttle: Arc<AtomicBool>,
}

/// Cloneable submit-only handle to a running `DbWriter` (see
/// `DbWriter::submitter`).
#[derive(Clone)]
pub struct WriteSubmitter {
    tx: Sender<WriteTask>,
    queue_len: Arc<std::sync::atomic::AtomicUsize>,
    throttle: Arc<AtomicBool>,
}

impl WriteSubmitter {
    pub fn submit(&self, task: WriteTask) {
        self.queue_len.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(task);
    }

    /// Current writer-queue depth; the scheduler's backpressure signal.
    pub fn queue_depth(&self) -> usize {
        self.queue_len.load(Ordering::SeqCst)
    }

    /// While set, the writer drains one task per transaction instead of a
    /// full batch, shortening each commit so readers get between them.
    pub fn set_throttled(&self, throttled: bool) {
        self.throttle.store(throttled, Ordering::Relaxed);
    }
}

impl DbWriter {
    pub fn start(
        conn: Connection,
        batch_size: usize,
        max_wait: Duration,
        engine: Option<Arc<dyn EngineAdapter>>,
        engine_retry_secs: i64,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<WriteTask>();
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Mutex::new(WriterCounters::default()));
        let queue_len = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let throttle = Arc::new(AtomicBool::new(false));

        let stop2 = Arc::clone(&stop);
        let counters2 = Arc::clone(&counters);
        let queue_len2 = Arc::clone(&queue_len);
        let throttle2 = Arc::clone(&throttle);

        let handle = std::thread::spawn(move || {
            run(conn, rx, batch_size, max_wait, engine, engine_retry_secs, stop2, counters2, queue_len2, throttle2);
        });

        Self {
            tx,
            stop,
            handle: Some(handle),
            counters,
            queue_len,
            throttle,
        }
    }

    pub fn submit(&self, task: WriteTask) {
        self.queue_len.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(task);
    }

    /// A cheap, cloneable handle worker threads can hold directly instead of
    /// sharing the `DbWriter` itself.
    pub fn submitter(&self) -> WriteSubmitter {
        WriteSubmitter {
            tx: self.tx.clone(),
            queue_len: Arc::clone(&self.queue_len),
            throttle: Arc::clone(&self.throttle),
        }
    }

    pub fn counters(&self) -> WriterCounters {
        let mut c = *self.counters.lock().unwrap();
        c.queue_depth = self.queue_len.load(Ordering::SeqCst);
        c
    }

    /// Signals the writer, waits up to `timeout` for the queue to drain,
    /// then joins. Returns `true` if the queue fully drained.
    pub fn stop(mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.queue_len.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let drained = self.queue_len.load(Ordering::SeqCst) == 0;
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        if !drained {
            let mut c = self.counters.lock().unwrap();
            c.dropped_on_shutdown += self.queue_len.load(Ordering::SeqCst) as u64;
        }
        drained
    }
}

fn run(
    mut conn: Connection,
    rx: Receiver<WriteTask>,
    batch_size: usize,
    max_wait: Duration,
    engine: Option<Arc<dyn EngineAdapter>>,
    engine_retry_secs: i64,
    stop: Arc<AtomicBool>,
    counters: Arc<Mutex<WriterCounters>>,
    queue_len: Arc<std::sync::atomic::AtomicUsize>,
    throttle: Arc<AtomicBool>,
) {
    loop {
        let size = if throttle.load(Ordering::Relaxed) { 1 } else { batch_size };
        let batch = drain_batch(&rx, size, max_wait);
        if batch.is_empty() {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            continue;
        }

        let started = Instant::now();
        let n = batch.len();
        match process_batch(&mut conn, &batch) {
            Ok(outcome) => {
                if let Some(engine) = &engine {
                    sync_engine(&conn, engine.as_ref(), &outcome.touched, engine_retry_secs);
                    resync_dead_letters(&conn, engine.as_ref(), &outcome.resync, engine_retry_secs);
                }
                run_merges(&mut conn, &outcome.merges);
                let mut c = counters.lock().unwrap();
                c.batches_committed += 1;
                c.tasks_committed += n as u64;
                c.last_commit_ts = crate::model::now_unix();
                c.last_batch_latency_ms = started.elapsed().as_millis() as u64;
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch failed, retrying tasks individually");
                for task in batch {
                    match process_batch(&mut conn, std::slice::from_ref(&task)) {
                        Ok(outcome) => {
                            if let Some(engine) = &engine {
                                sync_engine(&conn, engine.as_ref(), &outcome.touched, engine_retry_secs);
                                resync_dead_letters(&conn, engine.as_ref(), &outcome.resync, engine_retry_secs);
                            }
                            run_merges(&mut conn, &outcome.merges);
                            counters.lock().unwrap().tasks_committed += 1;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "persistent per-task write failure");
                            counters.lock().unwrap().tasks_failed += 1;
                        }
                    }
                }
            }
        }

        queue_len.fetch_sub(n, Ordering::SeqCst);

        if stop.load(Ordering::SeqCst) && rx.is_empty() {
            return;
        }
    }
}

fn run_merges(conn: &mut Connection, merges: &[(RootId, i64)]) {
    for (root_id, scan_started_ts) in merges {
        if let Err(e) = merge_staging(conn, *root_id, *scan_started_ts) {
            tracing::error!(error = %e, root = %root_id.to_hex(), "staging merge failed");
        }
    }
}

fn drain_batch(rx: &Receiver<WriteTask>, batch_size: usize, max_wait: Duration) -> Vec<WriteTask> {
    let mut batch = Vec::new();
    let deadline = Instant::now() + max_wait;
    while batch.len() < batch_size {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(task) => batch.push(task),
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    batch
}

/// What one committed batch leaves for the post-commit phases: files whose
/// engine documents need syncing, dead-letter paths to replay, and staging
/// merges to run (each in its own follow-up transaction).
struct BatchOutcome {
    touched: Vec<(FileKey, Option<FileRecord>)>,
    resync: Vec<FileKey>,
    merges: Vec<(RootId, i64)>,
}

/// Executes one batch inside a transaction, in the mandatory order
///: delete_path → upsert_files → upsert_symbols →
/// upsert_relations → update_last_seen → upsert_repo_meta → DLQ ops.
/// Returns the set of touched file keys for the post-commit engine sync.
fn process_batch(conn: &mut Connection, batch: &[WriteTask]) -> rusqlite::Result<BatchOutcome> {
    let tx = conn.transaction()?;
    let mut touched: Vec<(FileKey, Option<FileRecord>)> = Vec::new();
    let mut upserted: std::collections::HashMap<FileKey, FileRecord> = std::collections::HashMap::new();
    let mut resync: Vec<FileKey> = Vec::new();
    let mut merges: Vec<(RootId, i64)> = Vec::new();

    for task in batch {
        for op in &task.ops {
            if let WriteOp::DeletePath(key) = op {
                delete_path(&tx, key)?;
                touched.push((key.clone(), None));
            }
        }
    }
    for task in batch {
        let table = if task.staging { "staging_files" } else { "files" };
        for op in &task.ops {
            if let WriteOp::UpsertFile(record) = op {
                upsert_file(&tx, table, record)?;
                upserted.insert(record.key.clone(), record.clone());
            }
        }
    }
    for task in batch {
        for op in &task.ops {
            if let WriteOp::UpsertSymbols { file, root_id, symbols } = op {
                upsert_symbols(&tx, file, *root_id, symbols)?;
            }
        }
    }
    for task in batch {
        for op in &task.ops {
            if let WriteOp::UpsertRelations { file, relations } = op {
                upsert_relations(&tx, file, relations)?;
            }
        }
    }
    for task in batch {
        for op in &task.ops {
            // A last-seen refresh always means the row already lives in the
            // live table (only unchanged, previously-committed files take
            // the short-circuit), so staging never applies here.
            if let WriteOp::UpdateLastSeen { file, ts } = op {
                tx.execute(
                    "UPDATE files SET last_seen = ?1 WHERE path = ?2",
                    params![ts, file.as_str()],
                )?;
            }
        }
    }
    for task in batch {
        for op in &task.ops {
            if let WriteOp::UpsertRepoMeta(meta) = op {
                upsert_repo_meta(&tx, meta)?;
            }
        }
    }
    for task in batch {
        for op in &task.ops {
            match op {
                WriteOp::DlqClear { file } => {
                    tx.execute("DELETE FROM failed_tasks WHERE path = ?1", params![file.as_str()])?;
                }
                WriteOp::EngineResync { file } => resync.push(file.clone()),
                WriteOp::MergeStaging { root_id, scan_started_ts } => merges.push((*root_id, *scan_started_ts)),
                _ => {}
            }
        }
    }

    tx.commit()?;

    let mut merged: std::collections::HashMap<FileKey, Option<FileRecord>> = std::collections::HashMap::new();
    for (key, _) in touched {
        merged.insert(key, None);
    }
    for (key, record) in upserted {
        merged.insert(key, Some(record));
    }
    Ok(BatchOutcome {
        touched: merged.into_iter().collect(),
        resync,
        merges,
    })
}

fn delete_path(tx: &rusqlite::Transaction, key: &FileKey) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM files WHERE path = ?1", params![key.as_str()])?;
    tx.execute("DELETE FROM staging_files WHERE path = ?1", params![key.as_str()])?;
    tx.execute("DELETE FROM symbols WHERE path = ?1", params![key.as_str()])?;
    tx.execute("DELETE FROM symbol_relations WHERE from_path = ?1", params![key.as_str()])?;
    tx.execute("DELETE FROM files_fts WHERE path = ?1", params![key.as_str()])?;
    Ok(())
}

fn upsert_file(tx: &rusqlite::Transaction, table: &str, record: &FileRecord) -> rusqlite::Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO {table} (path, rel_path, root_id, repo, mtime, size, content, content_hash, \
             fts_content, last_seen, flags, parse_status, parse_reason, ast_status, ast_reason, \
             is_binary, is_minified, deleted, content_bytes, metadata_json) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20) \
             ON CONFLICT(path) DO UPDATE SET rel_path=excluded.rel_path, root_id=excluded.root_id, \
             repo=excluded.repo, mtime=excluded.mtime, size=excluded.size, content=excluded.content, \
             content_hash=excluded.content_hash, fts_content=excluded.fts_content, \
             last_seen=excluded.last_seen, flags=excluded.flags, parse_status=excluded.parse_status, \
             parse_reason=excluded.parse_reason, ast_status=excluded.ast_status, \
             ast_reason=excluded.ast_reason, is_binary=excluded.is_binary, \
             is_minified=excluded.is_minified, deleted=excluded.deleted, \
             content_bytes=excluded.content_bytes, metadata_json=excluded.metadata_json"
        ),
        params![
            record.key.as_str(),
            record.rel_path,
            record.root_id.to_hex(),
            record.repo,
            record.mtime,
            record.size,
            record.content,
            record.content_hash,
            record.fts_content,
            record.last_seen,
            record.flags.bits(),
            record.parse_status.as_str(),
            record.parse_reason,
            record.ast_status.as_str(),
            record.ast_reason,
            record.flags.contains(crate::model::FileFlags::BINARY),
            record.flags.contains(crate::model::FileFlags::MINIFIED),
            record.flags.contains(crate::model::FileFlags::DELETED),
            record.content_bytes,
            record.metadata_json,
        ],
    )?;

    if table == "files" {
        tx.execute("DELETE FROM files_fts WHERE path = ?1", params![record.key.as_str()])?;
        tx.execute(
            "INSERT INTO files_fts (path, rel_path, fts_content) VALUES (?1, ?2, ?3)",
            params![record.key.as_str(), record.rel_path, record.fts_content],
        )?;
    }
    Ok(())
}

fn upsert_symbols(tx: &rusqlite::Transaction, file: &FileKey, root_id: RootId, symbols: &[Symbol]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM symbols WHERE path = ?1", params![file.as_str()])?;
    for s in symbols {
        let metadata_json = serde_json::to_string(&s.metadata).unwrap_or_else(|_| "{}".to_string());
        tx.execute(
            "INSERT INTO symbols (symbol_id, path, root_id, name, kind, line, end_line, content, \
             parent, metadata_json, docstring, symbol_name_lc) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                s.id.0 as i64,
                file.as_str(),
                root_id.to_hex(),
                s.name,
                s.kind.as_str(),
                s.start_line,
                s.end_line,
                s.content,
                s.parent,
                metadata_json,
                s.docstring,
                s.name_lc(),
            ],
        )?;
    }
    Ok(())
}

fn upsert_relations(tx: &rusqlite::Transaction, file: &FileKey, relations: &[Relation]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM symbol_relations WHERE from_path = ?1", params![file.as_str()])?;
    for r in relations {
        tx.execute(
            "INSERT OR IGNORE INTO symbol_relations (from_path, from_root_id, from_symbol, \
             from_symbol_id, to_path, to_root_id, to_symbol, to_symbol_id, rel_type, line, metadata_json) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,'{}')",
            params![
                r.from_file.as_str(),
                r.from_root_id.to_hex(),
                r.from_symbol,
                r.from_symbol_id.0 as i64,
                r.to_file.as_ref().map(|f| f.as_str().to_string()),
                r.to_root_id.map(|id| id.to_hex()),
                r.to_symbol,
                r.to_symbol_id.map(|id| id.0 as i64),
                r.kind.as_str(),
                r.line,
            ],
        )?;
    }
    Ok(())
}

fn upsert_repo_meta(tx: &rusqlite::Transaction, meta: &RepoMeta) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO repo_meta (repo_name, tags, domain, description, priority) VALUES (?1,?2,?3,?4,?5) \
         ON CONFLICT(repo_name) DO UPDATE SET tags=excluded.tags, domain=excluded.domain, \
         description=excluded.description, priority=excluded.priority",
        params![meta.repo_name, meta.tags, meta.domain, meta.description, meta.priority],
    )?;
    Ok(())
}

/// Merges `staging_files` into `files` atomically and prunes rows whose
/// `last_seen` predates the scan.
///
/// Unchanged files never pass through staging — the worker short-circuits
/// them to a `files.last_seen` refresh — so the merge is an upsert of the
/// staged (new or changed) rows followed by a prune of everything the scan
/// did not touch, not a wholesale swap.
pub fn merge_staging(conn: &mut Connection, root_id: RootId, scan_started_ts: i64) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO files SELECT * FROM staging_files WHERE root_id = ?1",
        params![root_id.to_hex()],
    )?;
    tx.execute(
        "DELETE FROM staging_files WHERE root_id = ?1",
        params![root_id.to_hex()],
    )?;
    let pruned = tx.execute(
        "DELETE FROM files WHERE root_id = ?1 AND last_seen < ?2",
        params![root_id.to_hex(), scan_started_ts],
    )?;
    tx.execute(
        "DELETE FROM symbols WHERE root_id = ?1 AND path NOT IN (SELECT path FROM files)",
        params![root_id.to_hex()],
    )?;
    tx.execute(
        "DELETE FROM symbol_relations WHERE from_root_id = ?1 AND from_path NOT IN (SELECT path FROM files)",
        params![root_id.to_hex()],
    )?;
    // Staged rows bypass the files_fts mirror, so the full-text side is
    // rebuilt from the merged live rows in the same transaction. The
    // delete is keyed on the path prefix so rows for pruned files go too.
    tx.execute(
        "DELETE FROM files_fts WHERE path LIKE ?1 || '/%'",
        params![root_id.to_hex()],
    )?;
    tx.execute(
        "INSERT INTO files_fts (path, rel_path, fts_content) \
         SELECT path, rel_path, fts_content FROM files WHERE root_id = ?1",
        params![root_id.to_hex()],
    )?;
    tracing::info!(root = %root_id.to_hex(), scan_started_ts, pruned, "staging merge complete");
    tx.commit()
}

fn sync_engine(
    conn: &Connection,
    engine: &dyn EngineAdapter,
    touched: &[(FileKey, Option<FileRecord>)],
    engine_retry_secs: i64,
) {
    let mut to_upsert = Vec::new();
    let mut to_delete = Vec::new();
    for (key, record) in touched {
        match record {
            Some(r) => to_upsert.push(r.clone()),
            None => to_delete.push(key.clone()),
        }
    }

    if !to_upsert.is_empty() {
        if let Err(e) = engine.upsert_documents(&to_upsert) {
            dlq_insert_all(conn, &to_upsert.iter().map(|r| r.key.clone()).collect::<Vec<_>>(), &e.to_string(), engine_retry_secs);
        }
    }
    if !to_delete.is_empty() {
        if let Err(e) = engine.delete_documents(&to_delete) {
            dlq_insert_all(conn, &to_delete, &e.to_string(), engine_retry_secs);
        }
    }
}

/// Replays engine documents for dead-lettered paths. A path whose `files`
/// row is gone gets an engine delete instead; either way the DLQ row is
/// cleared on success and re-armed with a pushed-out `next_retry` on
/// failure.
fn resync_dead_letters(conn: &Connection, engine: &dyn EngineAdapter, keys: &[FileKey], retry_secs: i64) {
    for key in keys {
        let record = conn
            .query_row(
                "SELECT rel_path, root_id, repo, mtime, size, content, content_hash, fts_content, last_seen \
                 FROM files WHERE path = ?1",
                params![key.as_str()],
                |row| {
                    Ok(FileRecord {
                        key: key.clone(),
                        rel_path: row.get(0)?,
                        root_id: RootId::from_hex(&row.get::<_, String>(1)?).unwrap_or(RootId([0; 8])),
                        repo: row.get(2)?,
                        mtime: row.get(3)?,
                        size: row.get(4)?,
                        content: row.get(5)?,
                        content_hash: row.get(6)?,
                        fts_content: row.get(7)?,
                        last_seen: row.get(8)?,
                        flags: crate::model::FileFlags::empty(),
                        parse_status: crate::model::ParseStatus::Ok,
                        parse_reason: String::new(),
                        ast_status: crate::model::ParseStatus::Ok,
                        ast_reason: String::new(),
                        content_bytes: 0,
                        metadata_json: "{}".to_string(),
                    })
                },
            )
            .ok();

        let result = match &record {
            Some(r) => engine.upsert_documents(std::slice::from_ref(r)),
            None => engine.delete_documents(std::slice::from_ref(key)),
        };
        match result {
            Ok(()) => {
                let _ = conn.execute("DELETE FROM failed_tasks WHERE path = ?1", params![key.as_str()]);
            }
            Err(e) => {
                dlq_insert_all(conn, std::slice::from_ref(key), &e.to_string(), retry_secs);
            }
        }
    }
}

fn dlq_insert_all(conn: &Connection, keys: &[FileKey], error: &str, retry_secs: i64) {
    let now = crate::model::now_unix();
    for key in keys {
        let root_id = key.root_id().unwrap_or(RootId([0; 8]));
        let _ = conn.execute(
            "INSERT INTO failed_tasks (path, root_id, attempts, error, ts, next_retry, payload_json) \
             VALUES (?1,?2,1,?3,?4,?5,'{}') \
             ON CONFLICT(path, root_id) DO UPDATE SET attempts = attempts + 1, error = excluded.error, \
             ts = excluded.ts, next_retry = excluded.next_retry",
            params![key.as_str(), root_id.to_hex(), error, now, now + retry_secs],
        );
    }
}
