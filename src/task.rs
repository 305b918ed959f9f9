//! The task seam between the scheduler and the embedding runtime.
//!
//! Tasks are opaque to the scheduler: it stores cheap clonable handles, keys
//! them by a mutable 16-bit priority (smaller = higher priority), and claims
//! them for a worker through a compare-and-swap on an atomic 16-bit owner id
//! whose sentinel `-1` means unowned. The scheduler never allocates or frees
//! task objects.

/// Identifier of a worker thread, in `[0, workers)`.
pub type WorkerId = u16;

/// Sentinel value of a task's owner field meaning "no worker has claimed
/// this task".
pub const UNOWNED: i16 = -1;

/// Handle to a schedulable task, supplied by the embedding runtime.
///
/// # Contract
///
/// - `priority` must be stable while the task sits in a shard; the scheduler
///   writes it only in `enqueue_with_priority`, before insertion. Mutating
///   the priority of an enqueued task from outside breaks heap order.
/// - `owner` / `try_claim` operate on a single atomic owner id with the
///   [`UNOWNED`] sentinel. `try_claim` must be a compare-and-swap
///   `UNOWNED -> tid`: it returns `true` exactly when this call performed
///   the transition. A task is executed only by the worker that holds the
///   claim.
/// - Handles are cheap to clone (an `Arc` or an index into an arena) and a
///   task is present in at most one shard at a time.
pub trait TaskHandle: Clone + Send + Sync + 'static {
    /// Reads the task's priority; smaller values run first.
    fn priority(&self) -> u16;

    /// Writes the task's priority. Called only before insertion.
    fn set_priority(&self, priority: u16);

    /// Reads the owner id, or `None` when unowned.
    fn owner(&self) -> Option<WorkerId>;

    /// Attempts the `UNOWNED -> tid` claim. Returns whether this call won.
    fn try_claim(&self, tid: WorkerId) -> bool;
}

/// A minimal in-memory [`TaskHandle`] for tests.
#[cfg(any(test, feature = "test-internals"))]
pub use stub::StubTask;

#[cfg(any(test, feature = "test-internals"))]
mod stub {
    use super::{TaskHandle, WorkerId, UNOWNED};
    use std::sync::atomic::{AtomicI16, AtomicU16, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct StubInner {
        id: u32,
        priority: AtomicU16,
        owner: AtomicI16,
    }

    /// Heap-allocated stub task carrying an id for delivery accounting.
    #[derive(Debug, Clone)]
    pub struct StubTask {
        inner: Arc<StubInner>,
    }

    impl StubTask {
        /// Creates a stub with the given id and priority, unowned.
        #[must_use]
        pub fn new(id: u32, priority: u16) -> Self {
            Self {
                inner: Arc::new(StubInner {
                    id,
                    priority: AtomicU16::new(priority),
                    owner: AtomicI16::new(UNOWNED),
                }),
            }
        }

        /// Returns the id this stub was created with.
        #[must_use]
        pub fn id(&self) -> u32 {
            self.inner.id
        }
    }

    impl TaskHandle for StubTask {
        fn priority(&self) -> u16 {
            self.inner.priority.load(Ordering::Relaxed)
        }

        fn set_priority(&self, priority: u16) {
            self.inner.priority.store(priority, Ordering::Relaxed);
        }

        #[allow(clippy::cast_sign_loss)]
        fn owner(&self) -> Option<WorkerId> {
            match self.inner.owner.load(Ordering::Acquire) {
                UNOWNED => None,
                tid => Some(tid as WorkerId),
            }
        }

        #[allow(clippy::cast_possible_wrap)]
        fn try_claim(&self, tid: WorkerId) -> bool {
            self.inner
                .owner
                .compare_exchange(UNOWNED, tid as i16, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }
    }
}
