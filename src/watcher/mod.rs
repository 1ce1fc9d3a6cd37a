//! Watcher + Debouncer: a `notify::RecommendedWatcher` feeding an mpsc
//! channel, consumed from a plain OS thread and classified into typed
//! `{CREATED, MODIFIED, DELETED, MOVED}` events across every registered
//! root.

mod debounce;

pub use debounce::{Debouncer, RawEventKind};

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::model::RootId;

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Created { root_id: RootId, path: String },
    Modified { root_id: RootId, path: String },
    Deleted { root_id: RootId, path: String },
    Moved { root_id: RootId, src: String, dst: String },
}

/// Watches one or more registered roots, degrading to a logged warning
/// (scan-only coverage) when the native backend cannot establish a watch,
/// e.g. on network filesystems.
pub struct RootWatcher {
    _watcher: RecommendedWatcher,
    raw_rx: mpsc::Receiver<notify::Result<Event>>,
    roots: Vec<(RootId, PathBuf)>,
    debouncer: Debouncer,
}

impl RootWatcher {
    pub fn new(roots: Vec<(RootId, PathBuf)>, debounce_window: Duration) -> notify::Result<Self> {
        let (tx, raw_rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;

        for (_, path) in &roots {
            if let Err(e) = watcher.watch(path, RecursiveMode::Recursive) {
                tracing::warn!(root = %path.display(), error = %e, "falling back to polling for this root");
            }
        }

        Ok(Self {
            _watcher: watcher,
            raw_rx,
            roots,
            debouncer: Debouncer::new(debounce_window),
        })
    }

    fn root_for(&self, path: &Path) -> Option<(RootId, String)> {
        self.roots.iter().find_map(|(id, root)| {
            path.strip_prefix(root).ok().map(|rel| {
                (*id, crate::model::to_forward_slash(rel))
            })
        })
    }

    /// Blocks up to `timeout` for the next raw notify event, classifies it,
    /// and applies the debounce window. Returns `None` on timeout (caller
    /// loops back to check a shared stop flag) or when the event was
    /// swallowed as a duplicate burst.
    pub fn next_event(&mut self, timeout: Duration) -> Option<WatchEvent> {
        let res = self.raw_rx.recv_timeout(timeout).ok()?;
        let event = res.ok()?;
        self.classify(event)
    }

    fn classify(&mut self, event: Event) -> Option<WatchEvent> {
        match event.kind {
            EventKind::Create(_) => {
                let path = event.paths.first()?;
                let (root_id, rel) = self.root_for(path)?;
                if !self.debouncer.observe(root_id, &rel, RawEventKind::Created) {
                    return None;
                }
                Some(WatchEvent::Created { root_id, path: rel })
            }
            EventKind::Modify(notify::event::ModifyKind::Name(notify::event::RenameMode::Both)) => {
                if event.paths.len() == 2 {
                    let (root_id, src) = self.root_for(&event.paths[0])?;
                    let (_, dst) = self.root_for(&event.paths[1])?;
                    return Some(WatchEvent::Moved { root_id, src, dst });
                }
                None
            }
            EventKind::Modify(_) => {
                let path = event.paths.first()?;
                let (root_id, rel) = self.root_for(path)?;
                if !self.debouncer.observe(root_id, &rel, RawEventKind::Modified) {
                    return None;
                }
                Some(WatchEvent::Modified { root_id, path: rel })
            }
            EventKind::Remove(_) => {
                let path = event.paths.first()?;
                let (root_id, rel) = self.root_for(path)?;
                if !self.debouncer.observe(root_id, &rel, RawEventKind::Deleted) {
                    return None;
                }
                Some(WatchEvent::Deleted { root_id, path: rel })
            }
            _ => None,
        }
    }

    pub fn sweep_debouncer(&mut self) {
        self.debouncer.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn watcher_observes_a_created_file() {
        let dir = TempDir::new().unwrap();
        let root_id = RootId::from_normalized_path(&dir.path().to_string_lossy());
        let mut watcher =
            RootWatcher::new(vec![(root_id, dir.path().to_path_buf())], Duration::from_millis(50)).unwrap();

        fs::write(dir.path().join("new.py"), "x = 1").unwrap();

        let mut saw_event = false;
        for _ in 0..20 {
            if watcher.next_event(Duration::from_millis(200)).is_some() {
                saw_event = true;
                break;
            }
        }
        assert!(saw_event);
    }
}
