//! Core data model shared by every component: roots, files, symbols,
//! relations, repo metadata, snippets and the dead-letter queue.
//!
//! These types mirror the schema in `storage::schema` one field at a time;
//! a row never carries more than what its table persists.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Stable 8-byte identifier for a registered workspace root.
///
/// Derived from the normalized, case-folded root path so it survives
/// process restarts for the same underlying directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootId(pub [u8; 8]);

impl RootId {
    pub fn from_normalized_path(normalized: &str) -> Self {
        let digest = Sha256::digest(normalized.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        RootId(bytes)
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 {
            return None;
        }
        let mut bytes = [0u8; 8];
        for i in 0..8 {
            bytes[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(RootId(bytes))
    }
}

impl std::fmt::Display for RootId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// `"<root-id>/<root-relative-path>"`, always forward-slash separated.
/// The primary key across `files`, `symbols` and `symbol_relations`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileKey(pub String);

impl FileKey {
    pub fn new(root_id: RootId, rel_path: &str) -> Self {
        FileKey(format!("{root_id}/{}", rel_path.replace('\\', "/")))
    }

    pub fn root_id(&self) -> Option<RootId> {
        let (prefix, _) = self.0.split_once('/')?;
        RootId::from_hex(prefix)
    }

    pub fn rel_path(&self) -> &str {
        self.0.split_once('/').map(|(_, r)| r).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        const BINARY   = 0b0001;
        const MINIFIED = 0b0010;
        const DELETED  = 0b0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStatus {
    Ok,
    Skipped,
    Failed,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Ok => "ok",
            ParseStatus::Skipped => "skipped",
            ParseStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ok" => ParseStatus::Ok,
            "failed" => ParseStatus::Failed,
            _ => ParseStatus::Skipped,
        }
    }
}

/// One source file registered under exactly one root.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub key: FileKey,
    pub rel_path: String,
    pub root_id: RootId,
    pub repo: String,
    pub mtime: i64,
    pub size: i64,
    pub content: String,
    pub content_hash: String,
    pub fts_content: String,
    pub last_seen: i64,
    pub flags: FileFlags,
    pub parse_status: ParseStatus,
    pub parse_reason: String,
    pub ast_status: ParseStatus,
    pub ast_reason: String,
    pub content_bytes: i64,
    pub metadata_json: String,
}

/// Sentinel repo label for files directly under a root (no subdirectory).
pub const ROOT_LEVEL_REPO: &str = "_root";

pub fn repo_label(rel_path: &str) -> String {
    match rel_path.split_once('/') {
        Some((top, _)) if !top.is_empty() => top.to_string(),
        _ => ROOT_LEVEL_REPO.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Class,
    Interface,
    Enum,
    Record,
    Function,
    Method,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Enum => "enum",
            SymbolKind::Record => "record",
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "class" => SymbolKind::Class,
            "interface" => SymbolKind::Interface,
            "enum" => SymbolKind::Enum,
            "record" => SymbolKind::Record,
            "function" => SymbolKind::Function,
            "method" => SymbolKind::Method,
            _ => return None,
        })
    }
}

/// Stable hash of (file-key, kind, name, start-line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u64);

impl SymbolId {
    pub fn compute(file_key: &FileKey, kind: SymbolKind, name: &str, start_line: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file_key.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(start_line.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        SymbolId(u64::from_le_bytes(bytes))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolMetadata {
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub decorators: Vec<String>,
    #[serde(default)]
    pub http_path: Option<String>,
    #[serde(default)]
    pub http_methods: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub file: FileKey,
    pub root_id: RootId,
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: u32,
    pub end_line: u32,
    /// The raw declaration line, trimmed.
    pub content: String,
    pub parent: Option<String>,
    pub docstring: Option<String>,
    pub metadata: SymbolMetadata,
}

impl Symbol {
    pub fn name_lc(&self) -> String {
        self.name.to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    Calls,
    Extends,
    Implements,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Calls => "calls",
            RelationKind::Extends => "extends",
            RelationKind::Implements => "implements",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "calls" => RelationKind::Calls,
            "extends" => RelationKind::Extends,
            "implements" => RelationKind::Implements,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub from_file: FileKey,
    pub from_root_id: RootId,
    pub from_symbol: String,
    pub from_symbol_id: SymbolId,
    /// Empty when cross-file resolution is unavailable.
    pub to_file: Option<FileKey>,
    pub to_root_id: Option<RootId>,
    pub to_symbol: String,
    pub to_symbol_id: Option<SymbolId>,
    pub kind: RelationKind,
    pub line: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RepoMeta {
    pub repo_name: String,
    pub tags: String,
    pub domain: String,
    pub description: String,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct Snippet {
    pub id: i64,
    pub tag: String,
    pub path: FileKey,
    pub root_id: RootId,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub content_hash: String,
    pub created_ts: i64,
    pub updated_ts: i64,
}

#[derive(Debug, Clone)]
pub struct FailedTask {
    pub path: FileKey,
    pub root_id: RootId,
    pub attempts: u32,
    pub error: String,
    pub ts: i64,
    pub next_retry: i64,
    pub payload_json: String,
}

/// The in-memory unit the event coalescer produces and the scheduler
/// consumes. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoalesceAction {
    Index,
    Delete,
}

impl CoalesceAction {
    /// `coalesce(a, b) = DELETE if either is DELETE else INDEX`.
    pub fn coalesce(a: CoalesceAction, b: CoalesceAction) -> CoalesceAction {
        use CoalesceAction::*;
        match (a, b) {
            (Delete, _) | (_, Delete) => Delete,
            (Index, Index) => Index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoalesceTask {
    pub root_id: RootId,
    /// Root-relative, forward-slash separated.
    pub path: String,
    pub action: CoalesceAction,
    pub attempts: u32,
    pub enqueue_ts: i64,
    pub last_seen_ts: i64,
}

impl CoalesceTask {
    pub fn key(&self) -> (RootId, String) {
        (self.root_id, self.path.clone())
    }
}

/// Normalize any filesystem path separator into the forward-slash form the
/// rest of the system assumes.
pub fn to_forward_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_id_is_stable_for_same_path() {
        let a = RootId::from_normalized_path("/home/user/project");
        let b = RootId::from_normalized_path("/home/user/project");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 16);
    }

    #[test]
    fn root_id_round_trips_through_hex() {
        let a = RootId::from_normalized_path("/workspace");
        let hex = a.to_hex();
        assert_eq!(RootId::from_hex(&hex), Some(a));
    }

    #[test]
    fn file_key_extracts_root_and_rel_path() {
        let root = RootId::from_normalized_path("/workspace");
        let key = FileKey::new(root, "src/main.rs");
        assert_eq!(key.root_id(), Some(root));
        assert_eq!(key.rel_path(), "src/main.rs");
    }

    #[test]
    fn repo_label_uses_top_level_dir_or_sentinel() {
        assert_eq!(repo_label("pkg/src/main.rs"), "pkg");
        assert_eq!(repo_label("README.md"), ROOT_LEVEL_REPO);
    }

    #[test]
    fn coalesce_law_delete_wins() {
        use CoalesceAction::*;
        assert_eq!(CoalesceAction::coalesce(Index, Delete), Delete);
        assert_eq!(CoalesceAction::coalesce(Delete, Index), Delete);
        assert_eq!(CoalesceAction::coalesce(Index, Index), Index);
        assert_eq!(CoalesceAction::coalesce(Delete, Delete), Delete);
    }

    #[test]
    fn symbol_id_is_deterministic() {
        let key = FileKey::new(RootId::from_normalized_path("/w"), "a.py");
        let id1 = SymbolId::compute(&key, SymbolKind::Function, "old", 1);
        let id2 = SymbolId::compute(&key, SymbolKind::Function, "old", 1);
        let id3 = SymbolId::compute(&key, SymbolKind::Function, "new", 1);
        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }
}
