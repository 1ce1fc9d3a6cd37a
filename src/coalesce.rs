//! Event coalescer / dedup queue.
//!
//! A hash map and an insertion-ordered queue of keys, guarded by one
//! mutex — implemented with a single `IndexMap` so the map and the
//! arrival order live in one structure instead of two kept in sync by
//! hand.

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::model::{CoalesceAction, CoalesceTask, RootId};

pub type CoalesceKey = (RootId, String);

#[derive(Debug, Default, Clone, Copy)]
pub struct CoalesceCounters {
    pub dropped_overflow: u64,
    pub dropped_retry_exhausted: u64,
    pub dropped_shutdown: u64,
}

pub struct CoalesceQueue {
    inner: Mutex<IndexMap<CoalesceKey, CoalesceTask>>,
    max_keys: usize,
    counters: Mutex<CoalesceCounters>,
}

impl CoalesceQueue {
    pub fn new(max_keys: usize) -> Self {
        Self {
            inner: Mutex::new(IndexMap::new()),
            max_keys,
            counters: Mutex::new(CoalesceCounters::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> CoalesceCounters {
        *self.counters.lock()
    }

    /// Enqueue one raw action. A `Moved` event must already have been split
    /// into `Delete(src)` + `Index(dst)` by the caller.
    pub fn push(&self, root_id: RootId, path: String, action: CoalesceAction, now_ts: i64) {
        let key = (root_id, path.clone());
        let mut map = self.inner.lock();

        if let Some(existing) = map.get_mut(&key) {
            existing.action = CoalesceAction::coalesce(existing.action, action);
            existing.last_seen_ts = now_ts;
            // attempts is retained as the max across merges.
            return;
        }

        if map.len() >= self.max_keys {
            self.counters.lock().dropped_overflow += 1;
            return;
        }

        map.insert(
            key.clone(),
            CoalesceTask {
                root_id,
                path,
                action,
                attempts: 0,
                enqueue_ts: now_ts,
                last_seen_ts: now_ts,
            },
        );
    }

    /// Split a MOVED event deterministically: `DELETE(src)` then `INDEX(dst)`.
    pub fn push_moved(&self, root_id: RootId, src: String, dst: String, now_ts: i64) {
        self.push(root_id, src, CoalesceAction::Delete, now_ts);
        self.push(root_id, dst, CoalesceAction::Index, now_ts);
    }

    /// Pop the oldest-arrived task for processing. The task is removed from
    /// the map; on failure the caller re-pushes via `retry`.
    pub fn pop_front(&self) -> Option<CoalesceTask> {
        let mut map = self.inner.lock();
        map.shift_remove_index(0).map(|(_, task)| task)
    }

    /// Re-enqueue a failed task with `attempts + 1`. Returns `false` (and
    /// drops it, counted) once `max_retries` is exceeded.
    pub fn retry(&self, mut task: CoalesceTask, max_retries: u32) -> bool {
        task.attempts += 1;
        if task.attempts > max_retries {
            self.counters.lock().dropped_retry_exhausted += 1;
            return false;
        }
        let key = task.key();
        let mut map = self.inner.lock();
        // A fresher action may have arrived while this task was in flight;
        // coalesce rather than clobber.
        if let Some(existing) = map.get_mut(&key) {
            existing.action = CoalesceAction::coalesce(existing.action, task.action);
            existing.attempts = existing.attempts.max(task.attempts);
        } else {
            map.insert(key, task);
        }
        true
    }

    /// Drain whatever remains (used on shutdown after the drain interval
    /// elapses) and count it as abandoned.
    pub fn drain_and_count_abandoned(&self) -> usize {
        let mut map = self.inner.lock();
        let n = map.len();
        map.clear();
        if n > 0 {
            self.counters.lock().dropped_shutdown += n as u64;
        }
        n
    }

}

/// Retry back-off delay per :
/// `0.5s * 2^(attempts-1) * uniform(0.8, 1.2)`.
pub fn retry_backoff(attempts: u32) -> std::time::Duration {
    use rand::Rng;
    let base = 0.5_f64 * 2f64.powi(attempts.saturating_sub(1) as i32);
    let jitter = rand::rng().random_range(0.8..=1.2);
    std::time::Duration::from_secs_f64(base * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RootId;

    fn root() -> RootId {
        RootId::from_normalized_path("/ws")
    }

    #[test]
    fn coalesces_index_then_delete_into_delete() {
        let q = CoalesceQueue::new(100);
        q.push(root(), "x.py".into(), CoalesceAction::Index, 1);
        q.push(root(), "x.py".into(), CoalesceAction::Delete, 2);
        assert_eq!(q.len(), 1);
        let t = q.pop_front().unwrap();
        assert_eq!(t.action, CoalesceAction::Delete);
    }

    #[test]
    fn moved_splits_into_delete_then_index() {
        let q = CoalesceQueue::new(100);
        q.push_moved(root(), "src.py".into(), "dst.py".into(), 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn overflow_drops_distinct_new_keys_but_keeps_coalescing_existing() {
        let q = CoalesceQueue::new(1);
        q.push(root(), "a.py".into(), CoalesceAction::Index, 1);
        q.push(root(), "b.py".into(), CoalesceAction::Index, 2);
        assert_eq!(q.len(), 1);
        assert_eq!(q.counters().dropped_overflow, 1);

        q.push(root(), "a.py".into(), CoalesceAction::Delete, 3);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_front().unwrap().action, CoalesceAction::Delete);
    }

    #[test]
    fn retry_exhausts_after_max_retries() {
        let q = CoalesceQueue::new(100);
        let task = CoalesceTask {
            root_id: root(),
            path: "x.py".into(),
            action: CoalesceAction::Index,
            attempts: 2,
            enqueue_ts: 1,
            last_seen_ts: 1,
        };
        assert!(!q.retry(task, 2));
        assert_eq!(q.counters().dropped_retry_exhausted, 1);
    }

    #[test]
    fn pop_front_returns_oldest_arrival() {
        let q = CoalesceQueue::new(100);
        q.push(root(), "a.py".into(), CoalesceAction::Index, 1);
        q.push(root(), "b.py".into(), CoalesceAction::Index, 2);
        assert_eq!(q.pop_front().unwrap().path, "a.py");
        assert_eq!(q.pop_front().unwrap().path, "b.py");
    }
}
