//! Per-path debounce window, keyed on `(root-id, path)` since the daemon
//! watches many roots concurrently.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::model::RootId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    Created,
    Modified,
    Deleted,
}

pub struct Debouncer {
    window: Duration,
    last_seen: HashMap<(RootId, String), (Instant, RawEventKind)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Record one raw event. Returns `true` if the caller should act on it
    /// now (first sighting, or the window has elapsed since the last one),
    /// `false` if it should be swallowed as a duplicate burst.
    pub fn observe(&mut self, root_id: RootId, path: &str, kind: RawEventKind) -> bool {
        let key = (root_id, path.to_string());
        let now = Instant::now();
        match self.last_seen.get(&key) {
            Some((last, _)) if now.duration_since(*last) < self.window => {
                self.last_seen.insert(key, (now, kind));
                false
            }
            _ => {
                self.last_seen.insert(key, (now, kind));
                true
            }
        }
    }

    /// Drop entries older than `10 * window` so long-running daemons don't
    /// accumulate one entry per path ever touched.
    pub fn sweep(&mut self) {
        let cutoff = self.window * 10;
        let now = Instant::now();
        self.last_seen
            .retain(|_, (last, _)| now.duration_since(*last) < cutoff);
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn root() -> RootId {
        RootId::from_normalized_path("/w")
    }

    #[test]
    fn first_sighting_always_passes() {
        let mut d = Debouncer::new(Duration::from_millis(50));
        assert!(d.observe(root(), "a.py", RawEventKind::Modified));
    }

    #[test]
    fn rapid_repeats_within_window_are_swallowed() {
        let mut d = Debouncer::new(Duration::from_millis(200));
        assert!(d.observe(root(), "a.py", RawEventKind::Modified));
        assert!(!d.observe(root(), "a.py", RawEventKind::Modified));
    }

    #[test]
    fn repeats_after_window_pass_again() {
        let mut d = Debouncer::new(Duration::from_millis(10));
        assert!(d.observe(root(), "a.py", RawEventKind::Modified));
        sleep(Duration::from_millis(20));
        assert!(d.observe(root(), "a.py", RawEventKind::Modified));
    }
}
