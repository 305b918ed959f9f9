//! One shard of the multi-queue: a fixed-capacity d-ary min-heap behind a
//! non-blocking mutex, with an advisory atomic head-priority cache.
//!
//! The lock is authoritative: heap contents change only while it is held.
//! The cache is what makes cross-shard sampling lock-free: extractors read
//! it to pick a victim, then revalidate under the lock before committing a
//! pop. The cache may be stale-high (a freshly inserted minimum not yet
//! published), which only costs the next extractor a resample; it is never
//! stale-low because pops republish before releasing the lock.

use crate::error::{Error, ErrorKind};
use crate::task::TaskHandle;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

/// Cache value meaning "this shard is (believed) empty". Strictly greater
/// than every encoded 16-bit priority.
pub(crate) const HEAD_EMPTY: u32 = u32::MAX;

#[inline]
pub(crate) fn encode_priority(priority: u16) -> u32 {
    u32::from(priority)
}

/// The heap proper. Mutated only under the owning [`Shard`]'s lock.
#[derive(Debug)]
pub(crate) struct TaskHeap<T> {
    slots: Vec<T>,
    capacity: usize,
    arity: usize,
}

impl<T: TaskHandle> TaskHeap<T> {
    pub(crate) fn new(capacity: usize, arity: usize) -> Self {
        debug_assert!(arity >= 2, "heap arity must be at least 2");
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            arity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn peek(&self) -> Option<&T> {
        self.slots.first()
    }

    /// Priority of the heap root, encoded; [`HEAD_EMPTY`] when empty.
    pub(crate) fn head_priority(&self) -> u32 {
        self.peek().map_or(HEAD_EMPTY, |t| encode_priority(t.priority()))
    }

    /// Appends and sifts up.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::CapacityExceeded`] when the shard is full; capacity is
    /// fixed at configuration time.
    pub(crate) fn push(&mut self, task: T) -> Result<(), Error> {
        if self.slots.len() == self.capacity {
            return Err(Error::with_detail(
                ErrorKind::CapacityExceeded,
                format!("shard holds {} tasks; raise shard_capacity", self.capacity),
            ));
        }
        self.slots.push(task);
        self.sift_up(self.slots.len() - 1);
        Ok(())
    }

    /// Removes and returns the minimum-priority task.
    pub(crate) fn pop_head(&mut self) -> Option<T> {
        if self.slots.is_empty() {
            return None;
        }
        let last = self.slots.len() - 1;
        self.slots.swap(0, last);
        let task = self.slots.pop();
        if !self.slots.is_empty() {
            self.sift_down(0);
        }
        task
    }

    /// Read-only view of the occupied slots, for stop-the-world traversal.
    pub(crate) fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slots.iter()
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / self.arity;
            if self.slots[idx].priority() < self.slots[parent].priority() {
                self.slots.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.slots.len();
        loop {
            let first_child = idx * self.arity + 1;
            if first_child >= len {
                break;
            }
            let last_child = (first_child + self.arity).min(len);
            // First-wins on ties keeps the choice deterministic.
            let mut min = idx;
            for child in first_child..last_child {
                if self.slots[child].priority() < self.slots[min].priority() {
                    min = child;
                }
            }
            if min == idx {
                break;
            }
            self.slots.swap(idx, min);
            idx = min;
        }
    }
}

/// A shard: the heap, its trylock, and the advisory atomics that other
/// workers read without the lock.
#[derive(Debug)]
pub(crate) struct Shard<T> {
    heap: Mutex<TaskHeap<T>>,
    /// Cached root priority; acquire/release, authoritative only under the
    /// lock.
    head: AtomicU32,
    /// Advisory occupancy for the idle snapshot. Ordinary 16-bit loads; the
    /// sleep protocol tolerates inconsistency (§ sleep gate).
    occupancy: AtomicU16,
}

impl<T: TaskHandle> Shard<T> {
    pub(crate) fn new(capacity: usize, arity: usize) -> Self {
        Self {
            heap: Mutex::new(TaskHeap::new(capacity, arity)),
            head: AtomicU32::new(HEAD_EMPTY),
            occupancy: AtomicU16::new(0),
        }
    }

    pub(crate) fn load_head(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    pub(crate) fn occupancy(&self) -> u16 {
        self.occupancy.load(Ordering::Relaxed)
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, TaskHeap<T>>> {
        self.heap.try_lock()
    }

    /// Stores the true head priority and occupancy. Call with the lock held
    /// after a pop, so the cache is never left stale-low.
    pub(crate) fn publish(&self, heap: &TaskHeap<T>) {
        self.store_occupancy(heap);
        self.head.store(heap.head_priority(), Ordering::Release);
    }

    /// Updates only the occupancy count. The insert path publishes the head
    /// cache separately, outside the lock, via [`Shard::lower_head`].
    #[allow(clippy::cast_possible_truncation)] // capacity is clamped to u16
    pub(crate) fn store_occupancy(&self, heap: &TaskHeap<T>) {
        self.occupancy.store(heap.len() as u16, Ordering::Relaxed);
    }

    /// CASes the head cache down to `priority` if it is currently higher.
    /// Losing the race leaves the cache stale-high, which is benign.
    pub(crate) fn lower_head(&self, priority: u16) {
        let new = encode_priority(priority);
        let mut current = self.head.load(Ordering::Acquire);
        while new < current {
            match self
                .head
                .compare_exchange_weak(current, new, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Visits every enqueued task without taking the lock.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no thread is concurrently mutating this
    /// shard; in practice, a stop-the-world phase where every mutator is
    /// suspended at a safepoint or parked in a safe region.
    pub(crate) unsafe fn for_each_unlocked(&self, visitor: &mut dyn FnMut(&T)) {
        let heap = unsafe { &*self.heap.data_ptr() };
        for task in heap.iter() {
            visitor(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StubTask;

    fn heap(capacity: usize, arity: usize) -> TaskHeap<StubTask> {
        TaskHeap::new(capacity, arity)
    }

    #[test]
    fn pops_in_priority_order() {
        let mut h = heap(16, 8);
        for (id, priority) in [5u16, 1, 9, 3, 1].iter().enumerate() {
            h.push(StubTask::new(id as u32, *priority)).expect("push");
        }
        let order: Vec<u16> = std::iter::from_fn(|| h.pop_head())
            .map(|t| t.priority())
            .collect();
        assert_eq!(order, [1, 1, 3, 5, 9]);
        assert!(h.is_empty());
    }

    #[test]
    fn root_is_min_after_every_push() {
        let mut h = heap(64, 8);
        let mut min = u16::MAX;
        for (id, priority) in [40u16, 12, 99, 3, 3, 57, 0, 88].iter().enumerate() {
            h.push(StubTask::new(id as u32, *priority)).expect("push");
            min = min.min(*priority);
            assert_eq!(h.peek().expect("non-empty").priority(), min);
        }
    }

    #[test]
    fn ties_pop_deterministically() {
        // Equal priorities: repeated builds must pop the same id sequence.
        let build = || {
            let mut h = heap(8, 4);
            for id in 0..6u32 {
                h.push(StubTask::new(id, 7)).expect("push");
            }
            std::iter::from_fn(move || h.pop_head())
                .map(|t| t.id())
                .collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn push_full_heap_fails() {
        let mut h = heap(2, 8);
        h.push(StubTask::new(0, 1)).expect("first");
        h.push(StubTask::new(1, 2)).expect("second");
        let err = h.push(StubTask::new(2, 3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn pop_empty_returns_none() {
        let mut h = heap(4, 8);
        assert!(h.pop_head().is_none());
        assert_eq!(h.head_priority(), HEAD_EMPTY);
    }

    #[test]
    fn binary_arity_works() {
        let mut h = heap(32, 2);
        for (id, priority) in [9u16, 4, 7, 1, 8, 2].iter().enumerate() {
            h.push(StubTask::new(id as u32, *priority)).expect("push");
        }
        let order: Vec<u16> = std::iter::from_fn(|| h.pop_head())
            .map(|t| t.priority())
            .collect();
        assert_eq!(order, [1, 2, 4, 7, 8, 9]);
    }

    #[test]
    fn shard_publish_tracks_pop() {
        let shard: Shard<StubTask> = Shard::new(8, 8);
        {
            let mut heap = shard.try_lock().expect("uncontended");
            heap.push(StubTask::new(0, 5)).expect("push");
            shard.store_occupancy(&heap);
        }
        shard.lower_head(5);
        assert_eq!(shard.load_head(), 5);
        assert_eq!(shard.occupancy(), 1);

        {
            let mut heap = shard.try_lock().expect("uncontended");
            let _ = heap.pop_head();
            shard.publish(&heap);
        }
        assert_eq!(shard.load_head(), HEAD_EMPTY);
        assert_eq!(shard.occupancy(), 0);
    }

    #[test]
    fn lower_head_never_raises() {
        let shard: Shard<StubTask> = Shard::new(8, 8);
        shard.lower_head(10);
        assert_eq!(shard.load_head(), 10);
        shard.lower_head(20);
        assert_eq!(shard.load_head(), 10, "cache must only move down");
        shard.lower_head(3);
        assert_eq!(shard.load_head(), 3);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let shard: Shard<StubTask> = Shard::new(8, 8);
        let guard = shard.try_lock().expect("first lock");
        assert!(shard.try_lock().is_none(), "second trylock must fail");
        drop(guard);
        assert!(shard.try_lock().is_some());
    }

    #[test]
    fn unlocked_walk_sees_all_tasks() {
        let shard: Shard<StubTask> = Shard::new(8, 8);
        {
            let mut heap = shard.try_lock().expect("uncontended");
            for id in 0..5u32 {
                heap.push(StubTask::new(id, id as u16)).expect("push");
            }
            shard.store_occupancy(&heap);
        }
        let mut seen = Vec::new();
        // No concurrent mutators in this test, so the contract holds.
        unsafe {
            shard.for_each_unlocked(&mut |task| seen.push(task.id()));
        }
        seen.sort_unstable();
        assert_eq!(seen, [0, 1, 2, 3, 4]);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn extraction_is_sorted(priorities in proptest::collection::vec(any::<u16>(), 0..64)) {
                let mut h = heap(64, 8);
                for (id, priority) in priorities.iter().enumerate() {
                    h.push(StubTask::new(id as u32, *priority)).expect("push");
                }
                let mut popped: Vec<u16> = std::iter::from_fn(|| h.pop_head())
                    .map(|t| t.priority())
                    .collect();
                let mut expected = priorities.clone();
                expected.sort_unstable();
                prop_assert!(popped.windows(2).all(|w| w[0] <= w[1]));
                popped.sort_unstable();
                prop_assert_eq!(popped, expected);
            }

            #[test]
            fn root_is_min_under_interleaved_ops(
                ops in proptest::collection::vec((any::<bool>(), any::<u16>()), 0..128),
            ) {
                let mut h = heap(128, 8);
                let mut model: Vec<u16> = Vec::new();
                for (id, (pop, priority)) in ops.into_iter().enumerate() {
                    if pop {
                        let got = h.pop_head().map(|t| t.priority());
                        let expect = if model.is_empty() {
                            None
                        } else {
                            let min = *model.iter().min().expect("non-empty");
                            model.remove(model.iter().position(|&p| p == min).expect("present"));
                            Some(min)
                        };
                        prop_assert_eq!(got, expect);
                    } else {
                        h.push(StubTask::new(id as u32, priority)).expect("push");
                        model.push(priority);
                    }
                    let head = h.peek().map(|t| t.priority());
                    prop_assert_eq!(head, model.iter().min().copied());
                }
            }
        }
    }
}
