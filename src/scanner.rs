//! Filesystem Scanner: an `ignore::WalkBuilder` wrapper that yields
//! `(path, stat, excluded)` triples rather than dropping excluded
//! entries, so downstream can tell "deliberately skipped" from "not
//! found", with an explicit byte cap and symlink cycle guard.

use ignore::{WalkBuilder, WalkState};
use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::config::ScannerConfig;

#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub mtime: i64,
    pub size: u64,
    /// True when the entry was deliberately skipped (filters, byte cap) so
    /// callers can distinguish "skipped" from "not found".
    pub excluded: bool,
    /// True when the exclusion is the byte cap alone; such files still get
    /// an index row carrying the skip reason, just no content.
    pub oversized: bool,
}

/// Lazily streams `(path, stat, excluded)` triples for one root
///. Traversal is delegated to `ignore::WalkBuilder` running
/// on a background thread pool; results stream back through a channel so
/// callers never block on the whole tree completing.
pub struct FilesystemScanner {
    config: ScannerConfig,
    max_depth: usize,
}

impl FilesystemScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self::with_max_depth(config, 30)
    }

    pub fn with_max_depth(config: ScannerConfig, max_depth: usize) -> Self {
        Self { config, max_depth }
    }

    pub fn scan(&self, root: &Path) -> mpsc::Receiver<ScanEntry> {
        let (tx, rx) = mpsc::channel();
        let config = self.config.clone();
        let max_depth = self.max_depth;
        let root = root.to_path_buf();

        std::thread::spawn(move || {
            let visited_real_paths: Arc<Mutex<HashSet<PathBuf>>> =
                Arc::new(Mutex::new(HashSet::new()));

            let mut builder = WalkBuilder::new(&root);
            builder
                .hidden(false)
                .git_ignore(config.use_gitignore)
                .git_global(config.use_gitignore)
                .git_exclude(config.use_gitignore)
                .follow_links(false)
                .max_depth(Some(max_depth))
                .require_git(false);

            let mut overrides = ignore::overrides::OverrideBuilder::new(&root);
            for dir in &config.exclude_dirs {
                let _ = overrides.add(&format!("!**/{dir}/**"));
                let _ = overrides.add(&format!("!**/{dir}"));
            }
            for glob in &config.exclude_globs {
                let _ = overrides.add(&format!("!{glob}"));
            }
            if let Ok(built) = overrides.build() {
                builder.overrides(built);
            }

            let include_extensions: HashSet<String> = config
                .include_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect();
            let include_globs: Vec<glob::Pattern> = config
                .include_globs
                .iter()
                .filter_map(|g| glob::Pattern::new(g).ok())
                .collect();
            let max_bytes = config.max_file_bytes;

            builder.build_parallel().run(|| {
                let tx = tx.clone();
                let include_extensions = include_extensions.clone();
                let include_globs = include_globs.clone();
                let visited = Arc::clone(&visited_real_paths);
                Box::new(move |entry| {
                    let Ok(entry) = entry else {
                        return WalkState::Continue;
                    };
                    let Some(file_type) = entry.file_type() else {
                        return WalkState::Continue;
                    };
                    if !file_type.is_file() {
                        if file_type.is_symlink() {
                            if let Ok(real) = std::fs::canonicalize(entry.path()) {
                                let mut guard = visited.lock().unwrap();
                                if !guard.insert(real) {
                                    return WalkState::Skip;
                                }
                            }
                        }
                        return WalkState::Continue;
                    }

                    let path = entry.path().to_path_buf();
                    let metadata = match entry.metadata() {
                        Ok(m) => m,
                        Err(_) => return WalkState::Continue,
                    };

                    let included = is_included(&path, &include_extensions, &include_globs);
                    let oversized = metadata.len() > max_bytes;

                    let scan_entry = ScanEntry {
                        path: path.clone(),
                        mtime: mtime_secs(&metadata),
                        size: metadata.len(),
                        excluded: !included || oversized,
                        oversized: included && oversized,
                    };
                    let _ = tx.send(scan_entry);
                    WalkState::Continue
                })
            });
        });

        rx
    }
}

fn is_included(path: &Path, extensions: &HashSet<String>, globs: &[glob::Pattern]) -> bool {
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_lowercase()))
        .unwrap_or(false);
    if ext_ok {
        return true;
    }
    globs.iter().any(|g| g.matches_path(path))
}

fn mtime_secs(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_yields_included_and_excluded_entries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1").unwrap();
        fs::write(dir.path().join("notes.txt"), "not code").unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/lib.py"), "x = 1").unwrap();

        let scanner = FilesystemScanner::new(ScannerConfig::default());
        let rx = scanner.scan(dir.path());
        let entries: Vec<_> = rx.iter().collect();

        let a_py = entries.iter().find(|e| e.path.ends_with("a.py")).unwrap();
        assert!(!a_py.excluded);

        let notes = entries.iter().find(|e| e.path.ends_with("notes.txt"));
        if let Some(notes) = notes {
            assert!(notes.excluded);
        }

        assert!(!entries.iter().any(|e| e.path.to_string_lossy().contains("node_modules")));
    }

    #[test]
    fn oversized_file_is_marked_excluded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.py"), "x".repeat(100)).unwrap();

        let mut config = ScannerConfig::default();
        config.max_file_bytes = 10;
        let scanner = FilesystemScanner::new(config);
        let entries: Vec<_> = scanner.scan(dir.path()).iter().collect();

        let big = entries.iter().find(|e| e.path.ends_with("big.py")).unwrap();
        assert!(big.excluded);
    }
}
