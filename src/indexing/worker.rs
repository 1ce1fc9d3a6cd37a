//! Index Worker: the per-task pipeline. Stat, compare against the stored
//! row, enforce the byte cap, decode and redact, truncate, parse, then
//! emit rows tagged with the enqueue timestamp so commit-to-event latency
//! stays measurable.

use std::path::Path;
use std::time::SystemTime;

use crate::config::IndexingConfig;
use crate::error::{CoreError, CoreResult};
use crate::model::{to_forward_slash, repo_label, FileFlags, FileKey, FileRecord, ParseStatus, RootId};
use crate::parsing;
use crate::redact;
use crate::storage::writer::{WriteOp, WriteTask};

pub struct ExistingFileStat {
    pub mtime: i64,
    pub size: i64,
    pub content_hash: String,
}

pub enum WorkResult {
    /// File vanished between scan and processing, or a DELETE action was
    /// coalesced in.
    Delete(FileKey),
    /// Content changed (or fell inside the safety window): a full write
    /// task covering files/symbols/relations.
    Indexed(WriteTask),
    /// Content unchanged and outside the safety window: only `last_seen`
    /// moves.
    RefreshLastSeen(WriteTask),
}

const TRUNCATION_MARKER: &str = "\n\u{2026} [truncated]";

/// A line this long in source that was not machine-generated is vanishingly
/// rare; past it the file is treated as minified and symbol parsing skipped.
const MINIFIED_LINE_CHARS: usize = 2_000;

pub struct IndexWorker {
    config: IndexingConfig,
    engine_max_doc_bytes: u64,
}

impl IndexWorker {
    pub fn new(config: IndexingConfig, engine_max_doc_bytes: u64) -> Self {
        Self { config, engine_max_doc_bytes }
    }

    pub fn process(
        &self,
        root_id: RootId,
        root_path: &Path,
        rel_path: &str,
        existing: Option<ExistingFileStat>,
        enqueue_ts: i64,
        staging: bool,
    ) -> CoreResult<WorkResult> {
        let abs_path = root_path.join(rel_path);
        let key = FileKey::new(root_id, rel_path);

        let metadata = match std::fs::metadata(&abs_path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WorkResult::Delete(key));
            }
            Err(e) => return Err(CoreError::Io { path: abs_path, source: e }),
        };

        let mtime = mtime_secs(&metadata);
        let size = metadata.len() as i64;
        let now = crate::model::now_unix();
        let inside_safety_window = (now - mtime).abs() <= self.config.safety_window_secs;

        if let Some(existing) = &existing {
            let stat_unchanged = existing.mtime == mtime && existing.size == size;
            if stat_unchanged && !inside_safety_window {
                let task = WriteTask {
                    ops: vec![WriteOp::UpdateLastSeen { file: key.clone(), ts: now }],
                    enqueue_ts,
                    staging,
                };
                return Ok(WorkResult::RefreshLastSeen(task));
            }
        }

        if size as u64 > self.config.max_parse_bytes {
            let record = skipped_record(&key, rel_path, root_id, mtime, size, now, "exceeds max_file_bytes");
            let task = WriteTask {
                ops: vec![WriteOp::UpsertFile(record)],
                enqueue_ts,
                staging,
            };
            return Ok(WorkResult::Indexed(task));
        }

        let raw_bytes = std::fs::read(&abs_path).map_err(|e| CoreError::Io { path: abs_path.clone(), source: e })?;

        if is_binary(&raw_bytes) {
            let mut record = skipped_record(&key, rel_path, root_id, mtime, size, now, "binary");
            record.flags |= FileFlags::BINARY;
            let task = WriteTask {
                ops: vec![WriteOp::UpsertFile(record)],
                enqueue_ts,
                staging,
            };
            return Ok(WorkResult::Indexed(task));
        }

        let mut content = String::from_utf8_lossy(&raw_bytes).into_owned();
        if self.config.redact_enabled {
            content = redact::redact(&content);
        }

        let content_hash = content_hash(&content);

        if let Some(existing) = &existing {
            if existing.content_hash == content_hash && !inside_safety_window {
                let task = WriteTask {
                    ops: vec![WriteOp::UpdateLastSeen { file: key.clone(), ts: now }],
                    enqueue_ts,
                    staging,
                };
                return Ok(WorkResult::RefreshLastSeen(task));
            }
        }

        let minified = is_minified(&content);
        let stored_content = truncate_with_marker(&content, self.config.exclude_content_bytes as usize);
        let fts_content = truncate_with_marker(&content, self.engine_max_doc_bytes as usize);

        let ext = Path::new(rel_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();

        let parse_output = if minified {
            None
        } else if (raw_bytes.len() as u64) <= self.config.max_ast_bytes {
            Some(parsing::parse_file(&key, root_id, &ext, &content))
        } else {
            None
        };

        let (parse_status, parse_reason, symbols, relations) = match parse_output {
            Some(out) => (ParseStatus::Ok, String::new(), out.symbols, out.relations),
            None if minified => (ParseStatus::Skipped, "minified".to_string(), Vec::new(), Vec::new()),
            None => (ParseStatus::Skipped, "exceeds max_ast_bytes".to_string(), Vec::new(), Vec::new()),
        };

        let repo = repo_label(rel_path);
        let file_name = Path::new(rel_path).file_name().and_then(|n| n.to_str()).unwrap_or("");
        let repo_meta = crate::indexing::manifest::manifest_repo_meta(file_name, &repo, &content);

        let mut flags = FileFlags::empty();
        if minified {
            flags |= FileFlags::MINIFIED;
        }

        let record = FileRecord {
            key: key.clone(),
            rel_path: rel_path.to_string(),
            root_id,
            repo: repo.clone(),
            mtime,
            size,
            content: stored_content,
            content_hash,
            fts_content,
            last_seen: now,
            flags,
            parse_status,
            parse_reason,
            ast_status: ParseStatus::Ok,
            ast_reason: String::new(),
            content_bytes: raw_bytes.len() as i64,
            metadata_json: "{}".to_string(),
        };

        let mut ops = vec![
            WriteOp::UpsertFile(record),
            WriteOp::UpsertSymbols { file: key.clone(), root_id, symbols },
            WriteOp::UpsertRelations { file: key.clone(), relations },
            WriteOp::DlqClear { file: key },
        ];
        if let Some(meta) = repo_meta {
            ops.push(WriteOp::UpsertRepoMeta(meta));
        }

        Ok(WorkResult::Indexed(WriteTask { ops, enqueue_ts, staging }))
    }
}

/// A NUL in the first 8 KiB marks the file binary; lossy decoding would
/// only produce replacement-character soup the index cannot use.
fn is_binary(raw: &[u8]) -> bool {
    raw.iter().take(8192).any(|b| *b == 0)
}

fn is_minified(content: &str) -> bool {
    content.lines().any(|l| l.len() > MINIFIED_LINE_CHARS)
}

fn skipped_record(
    key: &FileKey,
    rel_path: &str,
    root_id: RootId,
    mtime: i64,
    size: i64,
    now: i64,
    reason: &str,
) -> FileRecord {
    FileRecord {
        key: key.clone(),
        rel_path: rel_path.to_string(),
        root_id,
        repo: repo_label(rel_path),
        mtime,
        size,
        content: String::new(),
        content_hash: String::new(),
        fts_content: String::new(),
        last_seen: now,
        flags: FileFlags::empty(),
        parse_status: ParseStatus::Skipped,
        parse_reason: reason.to_string(),
        ast_status: ParseStatus::Skipped,
        ast_reason: reason.to_string(),
        content_bytes: size,
        metadata_json: "{}".to_string(),
    }
}

fn truncate_with_marker(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let mut end = max_bytes.min(content.len());
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &content[..end], TRUNCATION_MARKER)
}

fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn to_rel_path(root_path: &Path, abs_path: &Path) -> Option<String> {
    abs_path
        .strip_prefix(root_path)
        .ok()
        .map(|p| to_forward_slash(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> IndexingConfig {
        IndexingConfig {
            max_parse_bytes: 1024 * 1024,
            max_ast_bytes: 1024 * 1024,
            safety_window_secs: 0,
            exclude_content_bytes: 1024,
            redact_enabled: true,
        }
    }

    fn worker() -> IndexWorker {
        IndexWorker::new(config(), 1024 * 1024)
    }

    #[test]
    fn missing_file_yields_delete() {
        let dir = TempDir::new().unwrap();
        let worker = worker();
        let root_id = RootId::from_normalized_path(&dir.path().to_string_lossy());
        let result = worker.process(root_id, dir.path(), "missing.py", None, 0, false).unwrap();
        assert!(matches!(result, WorkResult::Delete(_)));
    }

    #[test]
    fn new_file_is_indexed_with_symbols() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "def foo():\n    pass\n").unwrap();
        let worker = worker();
        let root_id = RootId::from_normalized_path(&dir.path().to_string_lossy());
        let result = worker.process(root_id, dir.path(), "a.py", None, 0, false).unwrap();
        match result {
            WorkResult::Indexed(task) => {
                assert!(task.ops.iter().any(|op| matches!(op, WriteOp::UpsertSymbols { symbols, .. } if !symbols.is_empty())));
            }
            _ => panic!("expected Indexed"),
        }
    }

    #[test]
    fn redacts_credentials_before_storage() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "password = \"hunter2\"\n").unwrap();
        let worker = worker();
        let root_id = RootId::from_normalized_path(&dir.path().to_string_lossy());
        let result = worker.process(root_id, dir.path(), "a.py", None, 0, false).unwrap();
        match result {
            WorkResult::Indexed(task) => {
                let content = task.ops.iter().find_map(|op| match op {
                    WriteOp::UpsertFile(r) => Some(r.content.clone()),
                    _ => None,
                }).unwrap();
                assert!(!content.contains("hunter2"));
            }
            _ => panic!("expected Indexed"),
        }
    }

    #[test]
    fn binary_file_is_flagged_and_not_parsed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blob.py"), b"\x00\x01\x02binary").unwrap();
        let worker = worker();
        let root_id = RootId::from_normalized_path(&dir.path().to_string_lossy());
        let result = worker.process(root_id, dir.path(), "blob.py", None, 0, false).unwrap();
        match result {
            WorkResult::Indexed(task) => {
                let record = task.ops.iter().find_map(|op| match op {
                    WriteOp::UpsertFile(r) => Some(r.clone()),
                    _ => None,
                }).unwrap();
                assert!(record.flags.contains(FileFlags::BINARY));
                assert_eq!(record.parse_status, ParseStatus::Skipped);
                assert!(record.content.is_empty());
            }
            _ => panic!("expected Indexed"),
        }
    }

    #[test]
    fn minified_file_is_flagged_and_symbols_skipped() {
        let dir = TempDir::new().unwrap();
        let one_liner = format!("var a=1;{}", "x".repeat(3000));
        std::fs::write(dir.path().join("bundle.js"), one_liner).unwrap();
        let worker = worker();
        let root_id = RootId::from_normalized_path(&dir.path().to_string_lossy());
        let result = worker.process(root_id, dir.path(), "bundle.js", None, 0, false).unwrap();
        match result {
            WorkResult::Indexed(task) => {
                let record = task.ops.iter().find_map(|op| match op {
                    WriteOp::UpsertFile(r) => Some(r.clone()),
                    _ => None,
                }).unwrap();
                assert!(record.flags.contains(FileFlags::MINIFIED));
                assert!(task.ops.iter().any(|op| matches!(op, WriteOp::UpsertSymbols { symbols, .. } if symbols.is_empty())));
            }
            _ => panic!("expected Indexed"),
        }
    }

    #[test]
    fn unchanged_content_refreshes_last_seen_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "x = 1\n").unwrap();
        let worker = worker();
        let root_id = RootId::from_normalized_path(&dir.path().to_string_lossy());

        std::thread::sleep(std::time::Duration::from_secs(2));
        let metadata = std::fs::metadata(&path).unwrap();
        let mtime = mtime_secs(&metadata);
        let existing = ExistingFileStat {
            mtime,
            size: metadata.len() as i64,
            content_hash: content_hash("x = 1\n"),
        };

        let result = worker.process(root_id, dir.path(), "a.py", Some(existing), 0, false).unwrap();
        assert!(matches!(result, WorkResult::RefreshLastSeen(_)));
    }
}
