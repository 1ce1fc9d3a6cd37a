//! Subcommand implementations. Human-readable output goes through
//! `comfy-table`/`console` when stdout is a terminal; `--json` renders the
//! same `presentation::Envelope` the MCP surface emits, so scripts parse
//! one shape regardless of transport.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;

use crate::config::Settings;
use crate::daemon::Daemon;
use crate::model::{FileKey, RootId};
use crate::presentation::{id_field, text_field, Encoding, Envelope, Record, RecordKind};
use crate::search::{SearchOptions, TotalMode};
use crate::storage::db;
use crate::{paths, services};

fn use_table() -> bool {
    std::io::stdout().is_terminal()
}

fn open_reader(settings: &Settings) -> anyhow::Result<rusqlite::Connection> {
    db::open_reader(&settings.storage.db_path)
        .with_context(|| format!("no index at {} (run `codewatch scan-once` first)", settings.storage.db_path.display()))
}

pub fn init(settings: &Settings, config_path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::default_config_path);
    if path.exists() && !force {
        bail!("config already exists at {} (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(settings)?;
    std::fs::write(&path, rendered)?;
    println!("wrote {}", path.display());
    Ok(())
}

pub async fn serve(mut settings: Settings, roots: Vec<PathBuf>, http: bool) -> anyhow::Result<()> {
    if !roots.is_empty() {
        settings.workspace.roots = roots;
    }
    if settings.workspace.roots.is_empty() {
        bail!("no workspace roots configured (pass --root, or set WORKSPACE_ROOT/ROOTS_JSON/ROOT_<N>)");
    }

    let enc = Encoding::from_config_str(&settings.mcp.encoding);
    let http_port = settings.mcp.http_port;
    let daemon = Arc::new(Daemon::start(settings).map_err(|e| anyhow::anyhow!(e.to_string()))?);

    #[cfg(feature = "http-server")]
    if http {
        let bind = format!("127.0.0.1:{http_port}");
        return crate::mcp::http::serve(daemon, enc, bind).await;
    }
    #[cfg(not(feature = "http-server"))]
    {
        let _ = http_port;
        if http {
            bail!("this build does not include the http-server feature");
        }
    }

    use rmcp::ServiceExt;
    eprintln!("codewatch MCP server on stdio transport");
    let server = crate::mcp::CodewatchServer::new(Arc::clone(&daemon), enc);
    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|e| anyhow::anyhow!("failed to start MCP server: {e}"))?;
    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;
    Ok(())
}

pub fn scan_once(mut settings: Settings, roots: Vec<PathBuf>, timeout_secs: u64) -> anyhow::Result<()> {
    if !roots.is_empty() {
        settings.workspace.roots = roots;
    }
    if settings.workspace.roots.is_empty() {
        bail!("no workspace roots configured (pass --root, or set WORKSPACE_ROOT/ROOTS_JSON/ROOT_<N>)");
    }

    let daemon = Daemon::start(settings).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let bar = if std::io::stderr().is_terminal() {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
        bar.enable_steady_tick(Duration::from_millis(120));
        Some(bar)
    } else {
        None
    };

    let deadline = std::time::Instant::now() + Duration::from_secs(timeout_secs);
    let drained = loop {
        if daemon.wait_until_idle(Duration::from_millis(500)) {
            break true;
        }
        if std::time::Instant::now() >= deadline {
            break false;
        }
        if let Some(bar) = &bar {
            let s = daemon.status();
            bar.set_message(format!(
                "indexing: scheduler={} writer={} committed={}",
                s.scheduler_depth, s.queue_db_writer, s.tasks_committed
            ));
        }
    };

    let status = daemon.status();
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    daemon.stop(Duration::from_secs(10));

    if !drained {
        bail!("scan did not settle within {timeout_secs}s");
    }
    println!(
        "{} {} tasks committed across {} batches",
        style("done:").green().bold(),
        status.tasks_committed,
        status.batches_committed
    );
    Ok(())
}

pub fn search(settings: &Settings, json: bool, query: &str, limit: usize, offset: usize, regex: bool) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let opts = SearchOptions {
        limit,
        offset,
        use_regex: regex,
        snippet_lines: settings.search.snippet_lines,
    };
    let result = crate::search::search(&conn, &crate::storage::NullEngine, query, &opts)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    if json {
        let mut env = Envelope::new("search", true).with_paging(result.hits.len(), result.total, result.total_mode);
        if result.meta.fallback_used {
            env = env.with_kv("fallback_used", "true");
        }
        if let Some(err) = &result.meta.regex_error {
            env = env.with_kv("regex_error", err.clone());
        }
        for hit in &result.hits {
            env = env.push(Record {
                kind: RecordKind::Record,
                fields: vec![
                    id_field("path", hit.path.clone()),
                    id_field("line", hit.line.to_string()),
                    id_field("score", format!("{:.4}", hit.score)),
                    text_field("snippet", hit.snippet.join("\n")),
                ],
            });
        }
        println!("{}", env.encode(Encoding::Json));
        return Ok(());
    }

    if let Some(err) = &result.meta.regex_error {
        eprintln!("{} {err}", style("regex error:").red().bold());
        return Ok(());
    }
    for hit in &result.hits {
        println!("{} {}", style(&hit.path).cyan().bold(), style(format!("(score {:.1})", hit.score)).dim());
        for line in &hit.snippet {
            println!("  {line}");
        }
    }
    let mode = match result.total_mode {
        TotalMode::Exact => "exact",
        TotalMode::Approx => "approx",
    };
    println!("{}", style(format!("{} of {} ({mode})", result.hits.len(), result.total)).dim());
    Ok(())
}

pub fn search_symbols(settings: &Settings, json: bool, query: &str, limit: usize, offset: usize) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let rows = crate::search::search_symbols(&conn, query, limit, offset).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let mut env = Envelope::new("search_symbols", true).with_paging(rows.len(), rows.len(), TotalMode::Exact);
    for (name, path, line) in &rows {
        if json {
            env = env.push(Record {
                kind: RecordKind::Header,
                fields: vec![id_field("name", name.clone()), id_field("path", path.clone()), id_field("line", line.to_string())],
            });
        } else {
            println!("{}  {path}:{line}", style(name).cyan().bold());
        }
    }
    if json {
        println!("{}", env.encode(Encoding::Json));
    }
    Ok(())
}

pub fn list_files(settings: &Settings, json: bool, repo: Option<&str>, limit: usize, offset: usize) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let (paths, total, mode) = crate::search::list_files(&conn, repo, limit, offset).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if json {
        let mut env = Envelope::new("list_files", true).with_paging(paths.len(), total, mode);
        for p in &paths {
            env = env.push(Record { kind: RecordKind::Path, fields: vec![id_field("path", p.clone())] });
        }
        println!("{}", env.encode(Encoding::Json));
        return Ok(());
    }
    for p in &paths {
        println!("{p}");
    }
    Ok(())
}

pub fn read_file(settings: &Settings, raw_key: &str) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let key = resolve_key_offline(settings, raw_key)?;
    let file = services::read_file(&conn, &key).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    println!("{}", file.content);
    Ok(())
}

pub fn read_symbol(settings: &Settings, name: &str) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let records = services::read_symbol(&conn, name, None).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    for r in records {
        println!(
            "{} {} {}:{}-{}",
            style(&r.kind).dim(),
            style(&r.name).cyan().bold(),
            r.path,
            r.start_line,
            r.end_line
        );
        if let Some(doc) = &r.docstring {
            for line in doc.lines() {
                println!("  {} {line}", style("//").dim());
            }
        }
        println!("{}", r.body);
    }
    Ok(())
}

pub fn relations(settings: &Settings, name: &str, implementations: bool) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let rows = if implementations {
        services::get_implementations(&conn, name)
    } else {
        services::get_callers(&conn, name)
    }
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    for r in rows {
        println!("{}  {} {}  {}:{}", r.from_symbol, style(&r.kind).dim(), r.to_symbol, r.from_path, r.line);
    }
    Ok(())
}

pub fn call_graph(settings: &Settings, name: &str, depth: u32) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let graph = services::call_graph(&conn, name, Some(depth), None).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    for edge in &graph.edges {
        println!("{}{} -> {}", "  ".repeat(edge.depth.saturating_sub(1) as usize), edge.from, edge.to);
    }
    if graph.truncated {
        println!("{}", style("(truncated)").dim());
    }
    Ok(())
}

pub fn repo_candidates(settings: &Settings, limit: usize) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let repos = services::repo_candidates(&conn, limit).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if use_table() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(["repo", "priority", "tags", "description"]);
        for r in repos {
            table.add_row([r.repo_name, r.priority.to_string(), r.tags, r.description]);
        }
        println!("{table}");
    } else {
        for r in repos {
            println!("{}\t{}\t{}", r.repo_name, r.priority, r.tags);
        }
    }
    Ok(())
}

pub fn status(settings: &Settings) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let count = |sql: &str| -> anyhow::Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let files = count("SELECT count(*) FROM files")?;
    let symbols = count("SELECT count(*) FROM symbols")?;
    let relations = count("SELECT count(*) FROM symbol_relations")?;
    let failed = count("SELECT count(*) FROM failed_tasks")?;
    let roots = count("SELECT count(*) FROM roots")?;
    let last_seen = count("SELECT coalesce(max(last_seen), 0) FROM files")?;

    if use_table() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(["metric", "value"]);
        table.add_row(["roots", &roots.to_string()]);
        table.add_row(["files", &files.to_string()]);
        table.add_row(["symbols", &symbols.to_string()]);
        table.add_row(["relations", &relations.to_string()]);
        table.add_row(["failed_tasks", &failed.to_string()]);
        table.add_row(["last_seen", &last_seen.to_string()]);
        println!("{table}");
    } else {
        println!("roots={roots} files={files} symbols={symbols} relations={relations} failed_tasks={failed} last_seen={last_seen}");
    }
    Ok(())
}

pub fn doctor(settings: &Settings, limit: usize) -> anyhow::Result<()> {
    let conn = open_reader(settings)?;
    let entries = services::failed_tasks(&conn, limit).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if entries.is_empty() {
        println!("{}", style("dead-letter queue empty").green());
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(["path", "attempts", "error", "next_retry"]);
        for e in entries {
            table.add_row([e.path, e.attempts.to_string(), e.error, e.next_retry.to_string()]);
        }
        println!("{table}");
    }

    let mut stmt = conn.prepare(
        "SELECT path, parse_reason FROM files WHERE parse_status = 'failed' ORDER BY size DESC LIMIT ?1",
    )?;
    let mut rows = stmt.query([limit as i64])?;
    while let Some(row) = rows.next()? {
        let path: String = row.get(0)?;
        let reason: String = row.get(1)?;
        println!("{} {path}: {reason}", style("parse failure:").yellow());
    }
    Ok(())
}

/// One-shot re-index of a single file, without a long-lived daemon: runs
/// the same worker pipeline and flushes one write batch.
pub fn index_file(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let roots = paths::resolve_workspace_roots(
        settings.workspace.roots.iter().cloned(),
        settings.workspace.follow_symlinks,
        settings.workspace.keep_nested_roots,
    )
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let abs = paths::normalize(path, settings.workspace.follow_symlinks).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let root_id = paths::require_in_scope(&abs, &roots).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let root_path = roots.iter().find(|(id, _)| *id == root_id).map(|(_, p)| p.clone()).unwrap();
    let rel = abs
        .strip_prefix(&root_path)
        .map(crate::model::to_forward_slash)
        .map_err(|_| anyhow::anyhow!("'{}' is not under its resolved root", path.display()))?;

    let _lock = db::WriteLock::acquire(&settings.storage.db_path).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let conn = db::open_writer(&settings.storage.db_path).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let writer = crate::storage::DbWriter::start(
        conn,
        settings.storage.write_batch_size,
        Duration::from_millis(settings.storage.write_max_wait_ms),
        None,
        settings.storage.engine_retry_secs,
    );

    let worker = crate::indexing::IndexWorker::new(settings.indexing.clone(), settings.engine.max_doc_bytes);
    let result = worker
        .process(root_id, &root_path, &rel, None, crate::model::now_unix(), false)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    match result {
        crate::indexing::WorkResult::Delete(key) => {
            writer.submit(crate::storage::WriteTask {
                ops: vec![crate::storage::WriteOp::DeletePath(key.clone())],
                enqueue_ts: crate::model::now_unix(),
                staging: false,
            });
            println!("deleted {key}");
        }
        crate::indexing::WorkResult::Indexed(task) | crate::indexing::WorkResult::RefreshLastSeen(task) => {
            writer.submit(task);
            println!("indexed {}", FileKey::new(root_id, &rel));
        }
    }
    if !writer.stop(Duration::from_secs(10)) {
        bail!("write queue did not drain");
    }
    Ok(())
}

/// `resolve_key` without a running daemon: uses the configured roots.
fn resolve_key_offline(settings: &Settings, raw: &str) -> anyhow::Result<FileKey> {
    if let Some((prefix, _)) = raw.split_once('/') {
        if RootId::from_hex(prefix).is_some() {
            return Ok(FileKey(raw.to_string()));
        }
    }
    let roots = paths::resolve_workspace_roots(
        settings.workspace.roots.iter().cloned(),
        settings.workspace.follow_symlinks,
        settings.workspace.keep_nested_roots,
    )
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    services::resolve_key(&roots, raw).map_err(|e| anyhow::anyhow!(e.to_string()))
}
