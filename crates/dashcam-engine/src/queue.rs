//! Central queue: per-category bounded queues with soft/hard backpressure
//! thresholds.
//!
//! Grounded on `original_source/pipeline/queues.py`'s `CentralTaskQueue`,
//! adapted from a multiprocessing-manager-backed structure to a single
//! `std::sync::Mutex`-guarded one, per spec.md §4.1: "the per-category lock
//! is the source of truth — separate atomic counters that can drift from
//! queue depth are forbidden." One mutex per category queue keeps
//! `backed_up` and `len()` from ever being observed out of sync with each
//! other.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;

use dashcam_core::{Task, TaskCategory};

/// Default ratio of `soft_limit` at which `backed_up` clears again (§3).
pub const DEFAULT_RECOVER_RATIO: f64 = 0.8;

#[derive(Debug)]
struct HeapEntry {
    priority: i32,
    seq: u64,
    task: Task,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first; among equal priorities, earlier insertion
        // (smaller seq) first — a max-heap needs the "smaller seq wins" leg
        // reversed.
        self.priority
            .cmp(&other.priority)
            .then_with(|| Reverse(self.seq).cmp(&Reverse(other.seq)))
    }
}

struct CategoryState {
    items: BinaryHeap<HeapEntry>,
    soft_limit: usize,
    hard_limit: usize,
    backed_up: bool,
    next_seq: u64,
}

impl CategoryState {
    fn new(soft_limit: usize, hard_limit: usize) -> Self {
        CategoryState {
            items: BinaryHeap::new(),
            soft_limit,
            hard_limit,
            backed_up: false,
            next_seq: 0,
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn push(&mut self, task: Task) -> bool {
        if self.items.len() >= self.hard_limit {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(HeapEntry {
            priority: task.priority,
            seq,
            task,
        });
        if self.items.len() >= self.soft_limit {
            self.backed_up = true;
        }
        true
    }

    fn pop(&mut self, recover_ratio: f64) -> Option<Task> {
        let entry = self.items.pop()?;
        let recover_at = (self.soft_limit as f64 * recover_ratio).floor() as usize;
        if self.items.len() <= recover_at {
            self.backed_up = false;
        }
        Some(entry.task)
    }
}

/// Per-category bounded queues with soft/hard backpressure thresholds.
///
/// Safe for many concurrent producers and consumers: every operation takes
/// the single mutex guarding all categories' state, so `backlog()` and
/// `is_backed_up()` can never be observed inconsistent with the queue
/// contents that produced them.
pub struct CentralQueue {
    recover_ratio: f64,
    state: Mutex<HashMap<TaskCategory, CategoryState>>,
}

impl CentralQueue {
    pub fn new(soft_limit: usize, hard_limit: usize) -> Self {
        Self::with_recover_ratio(soft_limit, hard_limit, DEFAULT_RECOVER_RATIO)
    }

    pub fn with_recover_ratio(soft_limit: usize, hard_limit: usize, recover_ratio: f64) -> Self {
        let mut state = HashMap::new();
        for category in TaskCategory::ALL {
            state.insert(category, CategoryState::new(soft_limit, hard_limit));
        }
        CentralQueue {
            recover_ratio,
            state: Mutex::new(state),
        }
    }

    /// Enqueue at the tail of `task.category`'s queue (subject to priority
    /// ordering on pop). Returns `false` iff the category is at its hard
    /// limit.
    pub fn push(&self, task: Task) -> bool {
        let mut state = self.state.lock().unwrap();
        state
            .get_mut(&task.category)
            .expect("all categories pre-populated")
            .push(task)
    }

    /// Non-blocking pop from `category`.
    pub fn pop(&self, category: TaskCategory) -> Option<Task> {
        let mut state = self.state.lock().unwrap();
        state
            .get_mut(&category)
            .expect("all categories pre-populated")
            .pop(self.recover_ratio)
    }

    pub fn backlog(&self, category: TaskCategory) -> usize {
        self.state.lock().unwrap()[&category].len()
    }

    pub fn snapshot(&self) -> HashMap<TaskCategory, usize> {
        self.state
            .lock()
            .unwrap()
            .iter()
            .map(|(c, s)| (*c, s.len()))
            .collect()
    }

    pub fn is_backed_up(&self, category: TaskCategory) -> bool {
        self.state.lock().unwrap()[&category].backed_up
    }

    pub fn backed_up_categories(&self) -> Vec<TaskCategory> {
        self.state
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.backed_up)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn total_gpu_backlog(&self) -> usize {
        let state = self.state.lock().unwrap();
        TaskCategory::GPU.iter().map(|c| state[c].len()).sum()
    }

    pub fn total_cpu_backlog(&self) -> usize {
        let state = self.state.lock().unwrap();
        TaskCategory::CPU.iter().map(|c| state[c].len()).sum()
    }

    pub fn total_backlog(&self) -> usize {
        self.state.lock().unwrap().values().map(|s| s.len()).sum()
    }

    /// Pick the lane category with the greatest backlog (busiest-first,
    /// §4.4). Ties break toward `loaded`, then declaration order. Returns
    /// `None` if every category in the lane is empty.
    pub fn busiest_category(
        &self,
        lane_categories: &[TaskCategory],
        loaded: Option<TaskCategory>,
    ) -> Option<TaskCategory> {
        let state = self.state.lock().unwrap();
        let max_backlog = lane_categories.iter().map(|c| state[c].len()).max()?;
        if max_backlog == 0 {
            return None;
        }
        if let Some(loaded) = loaded {
            if lane_categories.contains(&loaded) && state[&loaded].len() == max_backlog {
                return Some(loaded);
            }
        }
        lane_categories
            .iter()
            .find(|c| state[c].len() == max_backlog)
            .copied()
    }

    /// Release all underlying resources. The queue holds nothing but
    /// in-memory state, so this just drops everything still queued.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        for s in state.values_mut() {
            s.items.clear();
            s.backed_up = false;
        }
    }
}
