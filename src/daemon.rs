//! Orchestration: wires every component into one running process. The watcher and
//! worker threads are plain `std::thread` loops cooperating through a
//! shared stop flag; CPU-bound parsing dominates, so long-lived threads
//! with bounded queues beat an event-loop runtime here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rusqlite::Connection;

use crate::coalesce::{retry_backoff, CoalesceQueue};
use crate::config::Settings;
use crate::error::{CoreError, CoreResult};
use crate::indexing::{ExistingFileStat, IndexWorker, WorkResult};
use crate::model::{CoalesceAction, CoalesceTask, FileKey, RootId};
use crate::paths;
use crate::scanner::FilesystemScanner;
use crate::scheduler::{FairScheduler, Priority};
use crate::storage::engine::EngineAdapter;
use crate::storage::{db, DbWriter, NullEngine, WriteOp, WriteSubmitter, WriteTask};
use crate::watcher::{RootWatcher, WatchEvent};

/// Writer-queue depth past which worker threads start yielding to the
/// writer.
const WRITER_HIGH_WATER: usize = 512;
/// How recently a read must have happened for the read-priority penalty to
/// apply.
const READ_PENALTY_WINDOW_SECS: i64 = 1;
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonStatus {
    pub roots: usize,
    pub coalesce_depth: usize,
    pub scheduler_depth: usize,
    pub queue_db_writer: usize,
    pub batches_committed: u64,
    pub tasks_committed: u64,
    pub tasks_failed: u64,
    pub last_commit_ts: i64,
    pub last_batch_latency_ms: u64,
    pub engine_ready: bool,
}

struct WorkItem {
    root_id: RootId,
    root_path: PathBuf,
    rel_path: String,
    attempts: u32,
    enqueue_ts: i64,
    staging: bool,
}

/// One root's in-flight full scan. `sealed` flips once discovery has
/// submitted every entry, so a fast worker draining the queue mid-discovery
/// cannot trigger the merge early.
struct ScanProgress {
    remaining: i64,
    scan_started_ts: i64,
    sealed: bool,
}

type PendingScans = Arc<DashMap<RootId, ScanProgress>>;

/// A running daemon: the write lock, the writer thread, the watcher/drain/
/// worker/merge/maintenance threads, and the read-only connection the
/// search/services layers query against.
pub struct Daemon {
    settings: Settings,
    roots: Vec<(RootId, PathBuf)>,
    _write_lock: db::WriteLock,
    writer: DbWriter,
    engine: Arc<dyn EngineAdapter>,
    coalescer: Arc<CoalesceQueue>,
    scheduler: Arc<FairScheduler<WorkItem>>,
    stop: Arc<AtomicBool>,
    threads: Vec<std::thread::JoinHandle<()>>,
    reader: Mutex<Connection>,
    /// Second writable connection, serialized by its mutex, for the small
    /// mutations that must answer synchronously (snippet CRUD) and for TTL
    /// pruning. Index-table writes stay on the writer thread only.
    aux: Mutex<Connection>,
    last_read_ts: Arc<AtomicI64>,
    pending_scans: PendingScans,
}

impl Daemon {
    /// Resolves roots, acquires the single-writer lock, opens storage, spawns
    /// the watcher/coalescer-drain/worker/merge/maintenance threads, then
    /// kicks off one full scan per root.
    pub fn start(settings: Settings) -> CoreResult<Self> {
        let roots = paths::resolve_workspace_roots(
            settings.workspace.roots.iter().cloned(),
            settings.workspace.follow_symlinks,
            settings.workspace.keep_nested_roots,
        )?;
        let root_paths: HashMap<RootId, PathBuf> = roots.iter().cloned().collect();

        let write_lock = db::WriteLock::acquire(&settings.storage.db_path)?;
        let writer_conn = db::open_writer(&settings.storage.db_path)?;
        let aux_conn = db::open_writer(&settings.storage.db_path)?;
        let reader_conn = db::open_reader(&settings.storage.db_path)?;
        register_roots(&writer_conn, &roots)?;

        let engine: Arc<dyn EngineAdapter> = open_engine(&settings, &roots);

        let writer = DbWriter::start(
            writer_conn,
            settings.storage.write_batch_size,
            Duration::from_millis(settings.storage.write_max_wait_ms),
            if settings.engine.enabled { Some(Arc::clone(&engine)) } else { None },
            settings.storage.engine_retry_secs,
        );

        let coalescer = Arc::new(CoalesceQueue::new(settings.coalescer.max_keys));
        let scheduler: Arc<FairScheduler<WorkItem>> = Arc::new(FairScheduler::new(4));
        let stop = Arc::new(AtomicBool::new(false));
        let last_read_ts = Arc::new(AtomicI64::new(0));
        let pending_scans: PendingScans = Arc::new(DashMap::new());

        let mut threads = Vec::new();
        threads.push(spawn_watcher_thread(&roots, &settings, Arc::clone(&coalescer), Arc::clone(&stop)));
        threads.push(spawn_coalesce_drain_thread(
            Arc::clone(&coalescer),
            Arc::clone(&scheduler),
            root_paths,
            Arc::clone(&stop),
            settings.coalescer.drain_timeout_ms,
        ));
        for _ in 0..settings.scheduler.workers {
            threads.push(spawn_worker_thread(WorkerContext {
                scheduler: Arc::clone(&scheduler),
                config: settings.indexing.clone(),
                engine_max_doc_bytes: settings.engine.max_doc_bytes,
                db_path: settings.storage.db_path.clone(),
                submitter: writer.submitter(),
                coalescer: Arc::clone(&coalescer),
                max_retries: settings.coalescer.max_retries,
                read_penalty: Duration::from_millis(settings.scheduler.read_priority_penalty_ms),
                last_read_ts: Arc::clone(&last_read_ts),
                pending_scans: Arc::clone(&pending_scans),
                stop: Arc::clone(&stop),
            }));
        }
        threads.push(spawn_merge_thread(
            writer.submitter(),
            Arc::clone(&pending_scans),
            Arc::clone(&stop),
        ));
        threads.push(spawn_maintenance_thread(
            settings.storage.db_path.clone(),
            writer.submitter(),
            settings.clone(),
            Arc::clone(&stop),
        ));

        let daemon = Daemon {
            settings,
            roots: roots.clone(),
            _write_lock: write_lock,
            writer,
            engine,
            coalescer,
            scheduler: Arc::clone(&scheduler),
            stop,
            threads,
            reader: Mutex::new(reader_conn),
            aux: Mutex::new(aux_conn),
            last_read_ts,
            pending_scans,
        };

        for (root_id, root_path) in &roots {
            daemon.submit_full_scan(*root_id, root_path.clone());
        }
        crate::log_event!("daemon", "started", "{} roots", daemon.roots.len());

        Ok(daemon)
    }

    /// Streams one root's scan entries into the scheduler from a discovery
    /// thread, so `start`/`rescan` return without waiting on the walk.
    fn submit_full_scan(&self, root_id: RootId, root_path: PathBuf) {
        let now = crate::model::now_unix();
        self.pending_scans.insert(
            root_id,
            ScanProgress { remaining: 0, scan_started_ts: now, sealed: false },
        );

        let scanner =
            FilesystemScanner::with_max_depth(self.settings.scanner.clone(), self.settings.workspace.max_depth);
        let scheduler = Arc::clone(&self.scheduler);
        let pending = Arc::clone(&self.pending_scans);
        let rx = scanner.scan(&root_path);

        std::thread::spawn(move || {
            for entry in rx {
                if entry.excluded && !entry.oversized {
                    continue;
                }
                let Some(rel) = crate::indexing::worker::to_rel_path(&root_path, &entry.path) else {
                    continue;
                };
                if let Some(mut progress) = pending.get_mut(&root_id) {
                    progress.remaining += 1;
                }
                scheduler.submit(
                    root_id,
                    Priority::InitialScan,
                    WorkItem {
                        root_id,
                        root_path: root_path.clone(),
                        rel_path: rel,
                        attempts: 0,
                        enqueue_ts: now,
                        staging: true,
                    },
                );
            }
            if let Some(mut progress) = pending.get_mut(&root_id) {
                progress.sealed = true;
            }
            crate::log_event!("scanner", "discovery_complete", "root {}", root_id.to_hex());
        });
    }

    /// Re-triggers a full scan of `root_id` (or every root when `None`),
    /// staged the same way the initial scan is.
    pub fn rescan(&self, root_id: Option<RootId>) -> CoreResult<()> {
        for (id, path) in &self.roots {
            if root_id.is_none() || root_id == Some(*id) {
                self.submit_full_scan(*id, path.clone());
            }
        }
        Ok(())
    }

    /// Blocks until discovery, parsing and the writer queue have all
    /// drained (or `timeout` elapses). Returns whether the pipeline fully
    /// drained. Backs `scan_once`-style one-shot callers.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let counters = self.writer.counters();
            let idle = self.pending_scans.is_empty()
                && self.scheduler.is_empty()
                && self.coalescer.is_empty()
                && counters.queue_depth == 0;
            if idle {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }

    pub fn status(&self) -> DaemonStatus {
        let counters = self.writer.counters();
        DaemonStatus {
            roots: self.roots.len(),
            coalesce_depth: self.coalescer.len(),
            scheduler_depth: self.scheduler.len(),
            queue_db_writer: counters.queue_depth,
            batches_committed: counters.batches_committed,
            tasks_committed: counters.tasks_committed,
            tasks_failed: counters.tasks_failed,
            last_commit_ts: counters.last_commit_ts,
            last_batch_latency_ms: counters.last_batch_latency_ms,
            engine_ready: self.engine.status().ready,
        }
    }

    /// The read-only query connection. Taking it also stamps the read
    /// clock that feeds the scheduler's read-priority penalty.
    pub fn reader(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.last_read_ts.store(crate::model::now_unix(), Ordering::Relaxed);
        self.reader.lock().unwrap()
    }

    /// The serialized auxiliary write connection (snippet CRUD only).
    pub fn aux_writer(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.aux.lock().unwrap()
    }

    pub fn engine(&self) -> Arc<dyn EngineAdapter> {
        Arc::clone(&self.engine)
    }

    pub fn roots(&self) -> &[(RootId, PathBuf)] {
        &self.roots
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Enqueues one user-triggered re-index for `(root_id, rel_path)` at
    /// read-preempting priority.
    pub fn index_file(&self, root_id: RootId, rel_path: &str) -> CoreResult<()> {
        let root_path = self
            .roots
            .iter()
            .find(|(id, _)| *id == root_id)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| CoreError::RepoNotFound(root_id.to_hex()))?;
        self.scheduler.submit(
            root_id,
            Priority::Read,
            WorkItem {
                root_id,
                root_path,
                rel_path: rel_path.to_string(),
                attempts: 0,
                enqueue_ts: crate::model::now_unix(),
                staging: false,
            },
        );
        Ok(())
    }

    /// Signals every thread, waits for the writer queue to drain (bounded by
    /// `timeout`), then joins. This is the only cancellation primitive the
    /// daemon exposes; components check the shared stop flag between units
    /// of work.
    pub fn stop(mut self, timeout: Duration) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.writer.stop(timeout);
    }
}

fn register_roots(conn: &Connection, roots: &[(RootId, PathBuf)]) -> CoreResult<()> {
    let now = crate::model::now_unix();
    for (id, path) in roots {
        conn.execute(
            "INSERT INTO roots (root_id, root_path, real_path, label, created_ts, updated_ts) \
             VALUES (?1, ?2, ?2, ?3, ?4, ?4) \
             ON CONFLICT(root_id) DO UPDATE SET updated_ts = excluded.updated_ts",
            rusqlite::params![
                id.to_hex(),
                path.to_string_lossy(),
                path.file_name().and_then(|n| n.to_str()).unwrap_or("root"),
                now,
            ],
        )
        .map_err(CoreError::Sql)?;
    }
    Ok(())
}

fn open_engine(settings: &Settings, roots: &[(RootId, PathBuf)]) -> Arc<dyn EngineAdapter> {
    #[cfg(feature = "fts-engine")]
    {
        if settings.engine.enabled {
            // One engine directory per root set, so workspaces sharing a
            // data dir never step on each other's index.
            let index_dir = crate::config::default_data_dir()
                .join("engine-index")
                .join(roots_hash(roots));
            let config_hash = format!("{:x}-{:x}", settings.engine.mem_mb, settings.engine.max_doc_bytes);
            match crate::storage::engine::tantivy_engine::TantivyEngine::open(&index_dir, &config_hash) {
                Ok(e) => return Arc::new(e),
                Err(err) => {
                    tracing::warn!(error = %err, "external engine unavailable, degrading to SQL-only search");
                }
            }
        }
    }
    let _ = (settings, roots);
    Arc::new(NullEngine)
}

#[cfg(feature = "fts-engine")]
fn roots_hash(roots: &[(RootId, PathBuf)]) -> String {
    use sha2::{Digest, Sha256};
    let mut ids: Vec<String> = roots.iter().map(|(id, _)| id.to_hex()).collect();
    ids.sort();
    let digest = Sha256::digest(ids.join(",").as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

fn spawn_watcher_thread(
    roots: &[(RootId, PathBuf)],
    settings: &Settings,
    coalescer: Arc<CoalesceQueue>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    let roots = roots.to_vec();
    let debounce = Duration::from_millis(settings.watcher.debounce_ms);
    std::thread::spawn(move || {
        let mut watcher = match RootWatcher::new(roots, debounce) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "failed to start filesystem watcher, falling back to scan-only mode");
                return;
            }
        };
        while !stop.load(Ordering::SeqCst) {
            if let Some(event) = watcher.next_event(Duration::from_millis(250)) {
                let now = crate::model::now_unix();
                match event {
                    WatchEvent::Created { root_id, path } | WatchEvent::Modified { root_id, path } => {
                        coalescer.push(root_id, path, CoalesceAction::Index, now);
                    }
                    WatchEvent::Deleted { root_id, path } => {
                        coalescer.push(root_id, path, CoalesceAction::Delete, now);
                    }
                    WatchEvent::Moved { root_id, src, dst } => {
                        coalescer.push_moved(root_id, src, dst, now);
                    }
                }
            }
            watcher.sweep_debouncer();
        }
    })
}

/// Drains coalesced tasks into the scheduler at `Incremental` priority. The
/// action itself (`INDEX` vs `DELETE`) does not change which path the
/// worker takes — `IndexWorker::process` always stats the file fresh and
/// naturally resolves to a delete when the path is gone — so only the
/// relative path and retry count need to cross into a `WorkItem`.
fn spawn_coalesce_drain_thread(
    coalescer: Arc<CoalesceQueue>,
    scheduler: Arc<FairScheduler<WorkItem>>,
    root_paths: HashMap<RootId, PathBuf>,
    stop: Arc<AtomicBool>,
    drain_timeout_ms: u64,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        match coalescer.pop_front() {
            Some(task) => {
                if let Some(root_path) = root_paths.get(&task.root_id) {
                    scheduler.submit(
                        task.root_id,
                        Priority::Incremental,
                        WorkItem {
                            root_id: task.root_id,
                            root_path: root_path.clone(),
                            rel_path: task.path,
                            attempts: task.attempts,
                            enqueue_ts: task.enqueue_ts,
                            staging: false,
                        },
                    );
                }
            }
            None => {
                if stop.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(drain_timeout_ms));
                    let abandoned = coalescer.drain_and_count_abandoned();
                    if abandoned > 0 {
                        tracing::warn!(abandoned, "shutdown drain interval elapsed with pending tasks");
                    }
                    return;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    })
}

struct WorkerContext {
    scheduler: Arc<FairScheduler<WorkItem>>,
    config: crate::config::IndexingConfig,
    engine_max_doc_bytes: u64,
    db_path: PathBuf,
    submitter: WriteSubmitter,
    coalescer: Arc<CoalesceQueue>,
    max_retries: u32,
    read_penalty: Duration,
    last_read_ts: Arc<AtomicI64>,
    pending_scans: PendingScans,
    stop: Arc<AtomicBool>,
}

fn spawn_worker_thread(ctx: WorkerContext) -> std::thread::JoinHandle<()> {
    let worker = IndexWorker::new(ctx.config.clone(), ctx.engine_max_doc_bytes);
    std::thread::spawn(move || {
        // Per-worker read-only connection for the change-detection lookup;
        // losing it only costs the unchanged-file short-circuit.
        let stat_conn = db::open_reader(&ctx.db_path).ok();
        loop {
            match ctx.scheduler.next() {
                Some(job) => {
                    apply_backpressure(&ctx);
                    let item = job.payload;
                    let existing = stat_conn.as_ref().and_then(|c| existing_stat(c, item.root_id, &item.rel_path));
                    let result = worker.process(
                        item.root_id,
                        &item.root_path,
                        &item.rel_path,
                        existing,
                        item.enqueue_ts,
                        item.staging,
                    );
                    match result {
                        Ok(WorkResult::Delete(key)) => {
                            ctx.submitter.submit(delete_task(key, item.enqueue_ts, item.staging))
                        }
                        Ok(WorkResult::Indexed(task)) | Ok(WorkResult::RefreshLastSeen(task)) => {
                            ctx.submitter.submit(task)
                        }
                        Err(e) if e.is_transient() => {
                            schedule_retry(&ctx, &item, &e);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, path = %item.rel_path, "indexing failure");
                        }
                    }
                    if item.staging {
                        if let Some(mut progress) = ctx.pending_scans.get_mut(&item.root_id) {
                            progress.remaining -= 1;
                        }
                    }
                }
                None => {
                    if ctx.stop.load(Ordering::SeqCst) {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        }
    })
}

/// Yield to readers and to a backed-up writer before taking the next unit
/// of work. Past high-water the writer is also told to shrink its batches
/// to one task, so readers slot in between shorter commits.
fn apply_backpressure(ctx: &WorkerContext) {
    let now = crate::model::now_unix();
    let read_recent = now - ctx.last_read_ts.load(Ordering::Relaxed) <= READ_PENALTY_WINDOW_SECS;
    let over_high_water = ctx.submitter.queue_depth() > WRITER_HIGH_WATER;
    ctx.submitter.set_throttled(over_high_water);
    if read_recent || over_high_water {
        std::thread::sleep(ctx.read_penalty);
    }
}

fn existing_stat(conn: &Connection, root_id: RootId, rel_path: &str) -> Option<ExistingFileStat> {
    let key = FileKey::new(root_id, rel_path);
    conn.query_row(
        "SELECT mtime, size, content_hash FROM files WHERE path = ?1",
        [key.as_str()],
        |row| {
            Ok(ExistingFileStat {
                mtime: row.get(0)?,
                size: row.get(1)?,
                content_hash: row.get(2)?,
            })
        },
    )
    .ok()
}

/// Re-enqueue a transiently-failed task after the jittered back-off. The
/// sleep runs on a detached timer thread so no worker blocks; retries are
/// rare enough that a thread apiece is cheap.
fn schedule_retry(ctx: &WorkerContext, item: &WorkItem, err: &CoreError) {
    let task = CoalesceTask {
        root_id: item.root_id,
        path: item.rel_path.clone(),
        action: CoalesceAction::Index,
        attempts: item.attempts,
        enqueue_ts: item.enqueue_ts,
        last_seen_ts: crate::model::now_unix(),
    };
    tracing::warn!(error = %err, path = %item.rel_path, attempts = item.attempts, "transient indexing failure, scheduling retry");
    let coalescer = Arc::clone(&ctx.coalescer);
    let max_retries = ctx.max_retries;
    let delay = retry_backoff(item.attempts + 1);
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        coalescer.retry(task, max_retries);
    });
}

/// Watches `pending_scans` and hands the writer a `MergeStaging` task for
/// each root whose discovery is sealed and whose scan work has drained.
/// Queue FIFO guarantees the merge commits after every staged row
/// submitted before it.
fn spawn_merge_thread(
    submitter: WriteSubmitter,
    pending_scans: PendingScans,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        let drained: Vec<(RootId, i64)> = pending_scans
            .iter()
            .filter(|entry| entry.sealed && entry.remaining <= 0)
            .map(|entry| (*entry.key(), entry.scan_started_ts))
            .collect();
        for (root_id, scan_started_ts) in drained {
            // Submit before dropping the progress entry so `wait_until_idle`
            // never observes an idle instant between the two.
            submitter.submit(WriteTask {
                ops: vec![WriteOp::MergeStaging { root_id, scan_started_ts }],
                enqueue_ts: crate::model::now_unix(),
                staging: false,
            });
            pending_scans.remove(&root_id);
        }
        if stop.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(Duration::from_millis(200));
    })
}

/// Periodic housekeeping: replay due dead-letter engine syncs through the
/// writer thread, and TTL-prune snippets, contexts and failed tasks.
fn spawn_maintenance_thread(
    db_path: PathBuf,
    submitter: WriteSubmitter,
    settings: Settings,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let conn = match db::open_writer(&db_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "maintenance thread could not open the database");
                return;
            }
        };
        loop {
            // Sleep in small slices so shutdown is prompt.
            let slept_until = Instant::now() + MAINTENANCE_INTERVAL;
            while Instant::now() < slept_until {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(200));
            }

            let now = crate::model::now_unix();
            match due_dead_letters(&conn, now) {
                Ok(keys) if !keys.is_empty() => {
                    tracing::info!(count = keys.len(), "replaying dead-lettered engine syncs");
                    submitter.submit(WriteTask {
                        ops: keys.into_iter().map(|file| WriteOp::EngineResync { file }).collect(),
                        enqueue_ts: now,
                        staging: false,
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "dead-letter sweep failed"),
            }

            prune_ttl(&conn, &settings, now);
        }
    })
}

fn due_dead_letters(conn: &Connection, now: i64) -> rusqlite::Result<Vec<FileKey>> {
    let mut stmt = conn.prepare("SELECT path FROM failed_tasks WHERE next_retry <= ?1 LIMIT 100")?;
    let mut rows = stmt.query([now])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(FileKey(row.get(0)?));
    }
    Ok(out)
}

fn prune_ttl(conn: &Connection, settings: &Settings, now: i64) {
    let day = 86_400i64;
    let cutoffs = [
        (
            "DELETE FROM snippets WHERE tag NOT LIKE 'ctx:%' AND updated_ts < ?1",
            now - settings.storage.ttl_days_snippets * day,
        ),
        (
            "DELETE FROM snippets WHERE tag LIKE 'ctx:%' AND updated_ts < ?1",
            now - settings.storage.ttl_days_contexts * day,
        ),
        (
            "DELETE FROM failed_tasks WHERE ts < ?1",
            now - settings.storage.ttl_days_failed_tasks * day,
        ),
    ];
    for (sql, cutoff) in cutoffs {
        match conn.execute(sql, [cutoff]) {
            Ok(n) if n > 0 => tracing::debug!(pruned = n, "ttl prune"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "ttl prune failed"),
        }
    }
}

fn delete_task(key: FileKey, enqueue_ts: i64, staging: bool) -> WriteTask {
    WriteTask {
        ops: vec![WriteOp::DeletePath(key)],
        enqueue_ts,
        staging,
    }
}
