//! Keyed admission queue
//!
//! Items are kept in one FIFO lane per key. A key is dispatched only when it
//! is not in flight and the head of its lane is not waiting out a retry delay.
//! The caller holds a single lock around every method, which makes "is the key
//! free" and "mark the key in flight" one atomic step.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use tokio::time::Instant;

struct Pending<T> {
    value: T,
    not_before: Option<Instant>,
}

/// What a free worker should do next
pub(crate) enum Next<K, T> {
    /// Execute this value; its key is now in flight
    Ready(K, T),
    /// Nothing is eligible before this instant
    WaitUntil(Instant),
    /// Nothing is eligible until a key is released or new work arrives
    Idle,
}

pub(crate) struct KeyedQueue<K, T> {
    lanes: HashMap<K, VecDeque<Pending<T>>>,
    /// Keys with a non-empty lane, scanned front to back
    order: VecDeque<K>,
    in_flight: HashSet<K>,
    /// Cleared on graceful stop; retries are still accepted
    admitting: bool,
    closed: bool,
}

impl<K, T> KeyedQueue<K, T>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            lanes: HashMap::new(),
            order: VecDeque::new(),
            in_flight: HashSet::new(),
            admitting: true,
            closed: false,
        }
    }

    /// Append to the key's lane; hands the value back once admission stopped
    pub(crate) fn push(&mut self, key: K, value: T) -> Result<(), T> {
        if self.closed || !self.admitting {
            return Err(value);
        }
        self.lane_mut(key).push_back(Pending {
            value,
            not_before: None,
        });
        Ok(())
    }

    /// Put a retry at the head of its lane, eligible from `not_before`
    ///
    /// Later submissions for the same key stay behind it.
    pub(crate) fn push_retry(&mut self, key: K, value: T, not_before: Instant) -> Result<(), T> {
        if self.closed {
            return Err(value);
        }
        self.lane_mut(key).push_front(Pending {
            value,
            not_before: Some(not_before),
        });
        Ok(())
    }

    fn lane_mut(&mut self, key: K) -> &mut VecDeque<Pending<T>> {
        if !self.lanes.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.lanes.entry(key).or_default()
    }

    /// Claim the first eligible value
    pub(crate) fn take_next(&mut self, now: Instant) -> Next<K, T> {
        let mut earliest: Option<Instant> = None;
        let mut chosen = None;

        for (idx, key) in self.order.iter().enumerate() {
            if self.in_flight.contains(key) {
                continue;
            }
            let Some(head) = self.lanes.get(key).and_then(VecDeque::front) else {
                continue;
            };
            match head.not_before {
                Some(at) if at > now => {
                    earliest = Some(earliest.map_or(at, |e| e.min(at)));
                }
                _ => {
                    chosen = Some(idx);
                    break;
                }
            }
        }

        let Some(key) = chosen.and_then(|idx| self.order.remove(idx)) else {
            return earliest.map_or(Next::Idle, Next::WaitUntil);
        };
        let Some(lane) = self.lanes.get_mut(&key) else {
            return Next::Idle;
        };
        let Some(head) = lane.pop_front() else {
            self.lanes.remove(&key);
            return Next::Idle;
        };

        if lane.is_empty() {
            self.lanes.remove(&key);
        } else {
            // Rotate so other keys get a turn first
            self.order.push_back(key.clone());
        }
        self.in_flight.insert(key.clone());

        Next::Ready(key, head.value)
    }

    /// The execution holding `key` is over
    pub(crate) fn release(&mut self, key: &K) {
        self.in_flight.remove(key);
    }

    /// Drop the retry delay on the head of `key`'s lane
    pub(crate) fn force_ready(&mut self, key: &K) -> bool {
        match self.lanes.get_mut(key).and_then(VecDeque::front_mut) {
            Some(head) if head.not_before.is_some() => {
                head.not_before = None;
                true
            }
            _ => false,
        }
    }

    /// Refuse further pushes and hand back everything still queued
    pub(crate) fn close(&mut self) -> Vec<T> {
        self.closed = true;
        let mut drained = Vec::new();
        for key in self.order.drain(..) {
            if let Some(lane) = self.lanes.remove(&key) {
                drained.extend(lane.into_iter().map(|p| p.value));
            }
        }
        drained
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Refuse new submissions but keep serving what is queued
    pub(crate) fn stop_admission(&mut self) {
        self.admitting = false;
    }

    pub(crate) fn is_admitting(&self) -> bool {
        self.admitting && !self.closed
    }

    /// No queued values (in-flight executions are not counted)
    pub(crate) fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub(crate) fn queued(&self) -> usize {
        self.lanes.values().map(VecDeque::len).sum()
    }

    /// Queued values still waiting out a retry delay at `now`
    pub(crate) fn delayed(&self, now: Instant) -> usize {
        self.lanes
            .values()
            .flat_map(|lane| lane.iter())
            .filter(|p| p.not_before.is_some_and(|at| at > now))
            .count()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
