//! Fair Scheduler.
//!
//! Two axes of fairness: round-robin across roots so one large workspace
//! cannot starve the others, and a priority lane (initial scan vs.
//! incremental update vs. read request) within each root's turn.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::model::RootId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Lowest numeric value sorts first: reads preempt background indexing.
    Read = 0,
    Incremental = 1,
    InitialScan = 2,
}

#[derive(Debug, Clone)]
pub struct ScheduledJob<T> {
    pub root_id: RootId,
    pub priority: Priority,
    pub payload: T,
    pub seq: u64,
}

struct RootQueue<T> {
    lanes: [VecDeque<ScheduledJob<T>>; 3],
}

impl<T> Default for RootQueue<T> {
    fn default() -> Self {
        Self {
            lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }
}

impl<T> RootQueue<T> {
    fn push(&mut self, job: ScheduledJob<T>) {
        self.lanes[job.priority as usize].push_back(job);
    }

    fn pop(&mut self) -> Option<ScheduledJob<T>> {
        self.lanes
            .iter_mut()
            .find(|lane| !lane.is_empty())
            .and_then(|lane| lane.pop_front())
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.len()).sum()
    }

    fn is_empty(&self) -> bool {
        self.lanes.iter().all(|l| l.is_empty())
    }
}

/// Per-root round-robin scheduler with a three-lane priority queue inside
/// each root's turn.
pub struct FairScheduler<T> {
    state: Mutex<State<T>>,
}

struct State<T> {
    queues: HashMap<RootId, RootQueue<T>>,
    order: VecDeque<RootId>,
    next_seq: u64,
    /// Consecutive turns granted to the current head root since a different
    /// root last ran; caps one root's burst so a busy root cannot fully
    /// starve its neighbors.
    max_consecutive_turns: u32,
    consecutive_turns: u32,
}

impl<T> FairScheduler<T> {
    pub fn new(max_consecutive_turns: u32) -> Self {
        Self {
            state: Mutex::new(State {
                queues: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
                max_consecutive_turns: max_consecutive_turns.max(1),
                consecutive_turns: 0,
            }),
        }
    }

    pub fn submit(&self, root_id: RootId, priority: Priority, payload: T) -> u64 {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;

        if !state.queues.contains_key(&root_id) {
            state.queues.insert(root_id, RootQueue::default());
            state.order.push_back(root_id);
        }
        state
            .queues
            .get_mut(&root_id)
            .unwrap()
            .push(ScheduledJob {
                root_id,
                priority,
                payload,
                seq,
            });
        seq
    }

    /// Take the next job, rotating to the next non-empty root once the
    /// current root has had its fair share of consecutive turns.
    pub fn next(&self) -> Option<ScheduledJob<T>> {
        let mut state = self.state.lock();
        let State { queues, order, consecutive_turns, max_consecutive_turns, .. } = &mut *state;

        order.retain(|r| queues.get(r).map(|q| !q.is_empty()).unwrap_or(false));
        if order.is_empty() {
            return None;
        }

        if *consecutive_turns >= *max_consecutive_turns && order.len() > 1 {
            order.rotate_left(1);
            *consecutive_turns = 0;
        }

        let root = *order.front()?;
        let job = queues.get_mut(&root).and_then(|q| q.pop());

        if job.is_some() {
            *consecutive_turns += 1;
            let empty = queues.get(&root).map(|q| q.is_empty()).unwrap_or(true);
            if empty {
                queues.remove(&root);
                order.retain(|r| *r != root);
                *consecutive_turns = 0;
            } else if order.len() > 1 {
                // Always give the next root a turn next call, preventing one
                // busy root from running unbounded back-to-back jobs.
                order.rotate_left(1);
                *consecutive_turns = 0;
            }
        }
        job
    }

    pub fn len(&self) -> usize {
        self.state.lock().queues.values().map(RootQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root_count(&self) -> usize {
        self.state.lock().queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(n: u8) -> RootId {
        RootId([n, 0, 0, 0, 0, 0, 0, 0])
    }

    #[test]
    fn round_robins_across_roots() {
        let sched: FairScheduler<&'static str> = FairScheduler::new(1);
        sched.submit(root(1), Priority::Incremental, "a1");
        sched.submit(root(1), Priority::Incremental, "a2");
        sched.submit(root(2), Priority::Incremental, "b1");

        let first = sched.next().unwrap();
        assert_eq!(first.root_id, root(1));
        let second = sched.next().unwrap();
        assert_eq!(second.root_id, root(2));
    }

    #[test]
    fn read_priority_preempts_within_a_root() {
        let sched: FairScheduler<&'static str> = FairScheduler::new(10);
        sched.submit(root(1), Priority::InitialScan, "scan");
        sched.submit(root(1), Priority::Read, "read");

        let first = sched.next().unwrap();
        assert_eq!(first.payload, "read");
    }

    #[test]
    fn empty_scheduler_returns_none() {
        let sched: FairScheduler<()> = FairScheduler::new(5);
        assert!(sched.next().is_none());
        assert!(sched.is_empty());
    }

    #[test]
    fn exhausted_root_is_dropped_from_rotation() {
        let sched: FairScheduler<&'static str> = FairScheduler::new(5);
        sched.submit(root(1), Priority::Incremental, "only");
        assert_eq!(sched.root_count(), 1);
        sched.next();
        assert_eq!(sched.root_count(), 0);
    }
}
