//! Load-ordered index over a fixed worker pool.
//!
//! [`LoadIndex`] is an array-backed binary min-heap of [`WorkerId`] handles
//! ordered by each worker's pending-request count. Worker state lives in an
//! arena indexed by handle, and each arena slot records the worker's current
//! heap position, so an arbitrary worker can be removed and reinserted in
//! `O(log n)` without back-pointers from workers into the heap.
//!
//! Only the balancer owns a `LoadIndex`. Pending counts can only be changed
//! from inside this crate, which keeps the balancer the single writer.

use crate::{Error, Result};
use core::fmt;

/// Stable handle to a worker in the pool.
///
/// Handles are dense indices assigned at pool construction and never reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of this worker in the pool, in `0..pool_size`.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, Default)]
struct Slot {
    pending: usize,
    position: Option<usize>,
}

/// Binary min-heap of workers keyed by outstanding requests.
///
/// Ties between equally loaded workers are broken by whatever the heap layout
/// happens to produce. Callers must not depend on a particular order among
/// them.
#[derive(Clone, Debug)]
pub struct LoadIndex {
    slots: Vec<Slot>,
    heap: Vec<WorkerId>,
}

impl LoadIndex {
    /// Creates an index over `pool_size` idle workers, all of them present.
    pub fn with_workers(pool_size: usize) -> Self {
        let slots = (0..pool_size)
            .map(|i| Slot {
                pending: 0,
                position: Some(i),
            })
            .collect();
        let heap = (0..pool_size).map(WorkerId::new).collect();
        Self { slots, heap }
    }

    /// Number of workers currently in the heap.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of workers the index was built for, present or not.
    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// Handle of the `index`-th worker, whether or not it is in the heap.
    pub fn worker(&self, index: usize) -> Option<WorkerId> {
        (index < self.slots.len()).then(|| WorkerId::new(index))
    }

    /// Whether `worker` is currently in the heap.
    pub fn contains(&self, worker: WorkerId) -> bool {
        self.slots
            .get(worker.index())
            .is_some_and(|slot| slot.position.is_some())
    }

    /// Outstanding requests for `worker`, or `None` for a foreign handle.
    pub fn pending(&self, worker: WorkerId) -> Option<usize> {
        self.slots.get(worker.index()).map(|slot| slot.pending)
    }

    /// Returns the least-loaded worker without removing it.
    pub fn peek_min(&self) -> Option<WorkerId> {
        self.heap.first().copied()
    }

    /// Inserts `worker` at its current load.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownWorker`] if the handle is not part of this pool.
    /// - [`Error::AlreadyIndexed`] if the worker is already present.
    pub fn insert(&mut self, worker: WorkerId) -> Result<()> {
        let slot = self.slot(worker)?;
        if slot.position.is_some() {
            return Err(Error::AlreadyIndexed { worker });
        }

        let at = self.heap.len();
        self.heap.push(worker);
        self.slots[worker.index()].position = Some(at);
        self.sift_up(at);
        Ok(())
    }

    /// Removes and returns the worker with the fewest pending requests.
    pub fn extract_min(&mut self) -> Option<WorkerId> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(0, last);
        let worker = self.heap.pop()?;
        self.slots[worker.index()].position = None;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(worker)
    }

    /// Removes `worker` from wherever it sits in the heap.
    ///
    /// Returns `false` if the worker was not present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownWorker`] if the handle is not part of this pool.
    pub fn remove(&mut self, worker: WorkerId) -> Result<bool> {
        let Some(at) = self.slot(worker)?.position else {
            return Ok(false);
        };

        let last = self.heap.len() - 1;
        if at != last {
            self.swap(at, last);
        }
        self.heap.pop();
        self.slots[worker.index()].position = None;

        if at < self.heap.len() {
            self.fix(at);
        }
        Ok(true)
    }

    /// Adds one outstanding request to `worker` and returns the new count.
    pub(crate) fn increment(&mut self, worker: WorkerId) -> Result<usize> {
        let slot = self.slot_mut(worker)?;
        slot.pending += 1;
        let pending = slot.pending;
        self.refresh(worker);
        Ok(pending)
    }

    /// Retires one outstanding request from `worker` and returns the new
    /// count.
    pub(crate) fn decrement(&mut self, worker: WorkerId) -> Result<usize> {
        let slot = self.slot_mut(worker)?;
        slot.pending = slot
            .pending
            .checked_sub(1)
            .ok_or(Error::LoadUnderflow { worker })?;
        let pending = slot.pending;
        self.refresh(worker);
        Ok(pending)
    }

    /// Sum of pending requests across the whole pool.
    pub fn total_pending(&self) -> usize {
        self.slots.iter().map(|slot| slot.pending).sum()
    }

    /// Every worker in the pool with its pending count, in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (WorkerId::new(i), slot.pending))
    }

    /// Checks the heap-order property and the position bookkeeping.
    ///
    /// Every parent must carry no more pending requests than its children, and
    /// every present worker's recorded position must point back at it.
    pub fn is_heap_ordered(&self) -> bool {
        let ordered = (1..self.heap.len()).all(|i| !self.less(i, (i - 1) / 2));
        let tracked = self
            .heap
            .iter()
            .enumerate()
            .all(|(at, w)| self.slots[w.index()].position == Some(at));
        let present = self.slots.iter().filter(|s| s.position.is_some()).count();
        ordered && tracked && present == self.heap.len()
    }

    /// Snapshot of the pool's load distribution.
    pub fn stats(&self) -> LoadStats {
        LoadStats::from_loads(self.slots.iter().map(|slot| slot.pending).collect())
    }

    fn slot(&self, worker: WorkerId) -> Result<&Slot> {
        self.slots
            .get(worker.index())
            .ok_or(Error::UnknownWorker { worker })
    }

    fn slot_mut(&mut self, worker: WorkerId) -> Result<&mut Slot> {
        self.slots
            .get_mut(worker.index())
            .ok_or(Error::UnknownWorker { worker })
    }

    // A load change on a present worker must restore order around it.
    fn refresh(&mut self, worker: WorkerId) {
        if let Some(at) = self.slots[worker.index()].position {
            self.fix(at);
        }
    }

    fn fix(&mut self, at: usize) {
        if !self.sift_down(at) {
            self.sift_up(at);
        }
    }

    #[inline]
    fn less(&self, i: usize, j: usize) -> bool {
        self.slots[self.heap[i].index()].pending < self.slots[self.heap[j].index()].pending
    }

    #[inline]
    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.slots[self.heap[i].index()].position = Some(i);
        self.slots[self.heap[j].index()].position = Some(j);
    }

    fn sift_up(&mut self, mut at: usize) {
        while at > 0 {
            let parent = (at - 1) / 2;
            if !self.less(at, parent) {
                break;
            }
            self.swap(at, parent);
            at = parent;
        }
    }

    /// Returns whether the element moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let len = self.heap.len();
        let mut at = start;
        loop {
            let left = 2 * at + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, at) {
                break;
            }
            self.swap(at, child);
            at = child;
        }
        at > start
    }
}

/// Per-worker loads with their mean and population variance.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadStats {
    pub loads: Vec<usize>,
    pub total: usize,
    pub mean: f64,
    pub variance: f64,
}

impl LoadStats {
    fn from_loads(loads: Vec<usize>) -> Self {
        let total: usize = loads.iter().sum();
        if loads.is_empty() {
            return Self {
                loads,
                total,
                mean: 0.0,
                variance: 0.0,
            };
        }

        let n = loads.len() as f64;
        let mean = total as f64 / n;
        let sum_sq: f64 = loads.iter().map(|&l| (l * l) as f64).sum();
        // Clamp away tiny negative values from float cancellation.
        let variance = (sum_sq / n - mean * mean).max(0.0);
        Self {
            loads,
            total,
            mean,
            variance,
        }
    }
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for load in &self.loads {
            write!(f, "{load} ")?;
        }
        write!(f, " {:.2} {:.2}", self.mean, self.variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, rng};

    fn loaded(loads: &[usize]) -> LoadIndex {
        let mut index = LoadIndex::with_workers(loads.len());
        for (i, &load) in loads.iter().enumerate() {
            for _ in 0..load {
                index.increment(WorkerId::new(i)).unwrap();
            }
        }
        index
    }

    #[test]
    fn new_index_holds_every_worker_idle() {
        let index = LoadIndex::with_workers(4);
        assert_eq!(index.len(), 4);
        assert_eq!(index.pool_size(), 4);
        assert_eq!(index.total_pending(), 0);
        assert!(index.is_heap_ordered());
        for i in 0..4 {
            assert!(index.contains(WorkerId::new(i)));
            assert_eq!(index.pending(WorkerId::new(i)), Some(0));
        }
    }

    #[test]
    fn handles_are_available_for_absent_workers() {
        let mut index = LoadIndex::with_workers(3);
        let first = index.extract_min().unwrap();
        assert_eq!(index.worker(first.index()), Some(first));
        assert!(!index.contains(first));
        assert_eq!(index.worker(3), None);

        let second = index.worker((first.index() + 1) % 3).unwrap();
        assert!(index.remove(second).unwrap());
        index.insert(second).unwrap();
        index.insert(first).unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.is_heap_ordered());
    }

    #[test]
    fn extract_min_yields_nondecreasing_loads() {
        let mut index = loaded(&[5, 0, 3, 9, 1, 1, 7]);
        let mut last = 0;
        while let Some(worker) = index.extract_min() {
            let load = index.pending(worker).unwrap();
            assert!(load >= last);
            assert!(!index.contains(worker));
            assert!(index.is_heap_ordered());
            last = load;
        }
        assert!(index.is_empty());
        assert_eq!(index.extract_min(), None);
    }

    #[test]
    fn insert_rejects_present_and_foreign_workers() {
        let mut index = LoadIndex::with_workers(2);
        assert_eq!(
            index.insert(WorkerId::new(0)),
            Err(Error::AlreadyIndexed {
                worker: WorkerId::new(0)
            })
        );
        assert_eq!(
            index.insert(WorkerId::new(2)),
            Err(Error::UnknownWorker {
                worker: WorkerId::new(2)
            })
        );
    }

    #[test]
    fn remove_arbitrary_worker_keeps_order() {
        let mut index = loaded(&[4, 2, 8, 1, 6, 3, 5]);
        let target = WorkerId::new(1);

        assert_eq!(index.remove(target), Ok(true));
        assert!(!index.contains(target));
        assert_eq!(index.len(), 6);
        assert!(index.is_heap_ordered());

        assert_eq!(index.remove(target), Ok(false));

        index.insert(target).unwrap();
        assert!(index.contains(target));
        assert!(index.is_heap_ordered());
    }

    #[test]
    fn remove_last_and_only_element() {
        let mut index = LoadIndex::with_workers(1);
        let only = WorkerId::new(0);
        assert_eq!(index.remove(only), Ok(true));
        assert!(index.is_empty());
        assert!(index.is_heap_ordered());
        index.insert(only).unwrap();
        assert_eq!(index.peek_min(), Some(only));
    }

    #[test]
    fn decrement_below_zero_is_rejected() {
        let mut index = LoadIndex::with_workers(2);
        let worker = WorkerId::new(1);
        assert_eq!(
            index.decrement(worker),
            Err(Error::LoadUnderflow { worker })
        );
        assert_eq!(index.pending(worker), Some(0));
    }

    #[test]
    fn load_change_on_present_worker_restores_order() {
        let mut index = LoadIndex::with_workers(5);
        let worker = index.peek_min().unwrap();
        index.increment(worker).unwrap();
        index.increment(worker).unwrap();
        assert!(index.is_heap_ordered());
        assert_ne!(index.peek_min(), Some(worker));
    }

    #[test]
    fn randomized_dispatch_and_completion_preserve_invariants() {
        const WORKERS: usize = 16;
        let mut rng = rng();
        let mut index = LoadIndex::with_workers(WORKERS);
        let mut dispatched = 0usize;
        let mut completed = 0usize;

        for _ in 0..10_000 {
            if index.total_pending() == 0 || rng.random_bool(0.55) {
                let worker = index.extract_min().unwrap();
                let min = index.iter().map(|(_, l)| l).min().unwrap();
                assert!(index.pending(worker).unwrap() <= min);
                index.increment(worker).unwrap();
                index.insert(worker).unwrap();
                dispatched += 1;
            } else {
                let busy: Vec<_> = index.iter().filter(|&(_, l)| l > 0).collect();
                let (worker, _) = busy[rng.random_range(0..busy.len())];
                assert!(index.remove(worker).unwrap());
                index.decrement(worker).unwrap();
                index.insert(worker).unwrap();
                completed += 1;
            }

            assert!(index.is_heap_ordered());
            assert_eq!(index.len(), WORKERS);
            assert_eq!(index.total_pending(), dispatched - completed);
        }
    }

    #[test]
    fn stats_report_mean_and_variance() {
        let stats = loaded(&[1, 2, 3]).stats();
        assert_eq!(stats.loads, vec![1, 2, 3]);
        assert_eq!(stats.total, 6);
        assert!((stats.mean - 2.0).abs() < f64::EPSILON);
        assert!((stats.variance - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.to_string(), "1 2 3  2.00 0.67");

        let empty = LoadIndex::with_workers(0).stats();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.mean, 0.0);
    }
}
