//! Sharded priority multi-queue scheduler for a user-level task runtime.
//!
//! `parsched` schedules opaque task handles across a fixed pool of OS worker
//! threads. Runnable tasks live in `c * P` independent d-ary min-heaps (the
//! *shards*); insertion picks a random shard under a trylock, extraction
//! samples two shards and takes the one with the lower cached head priority.
//! When the whole system goes quiescent, workers park on per-worker condition
//! variables behind a three-state sleep gate that guarantees no wakeup is
//! ever lost against a concurrent enqueue. At most one worker at a time
//! drives an external event loop while the rest sleep.
//!
//! The scheduler never allocates or frees tasks. It stores handles supplied
//! by the embedding runtime through the [`TaskHandle`] seam and hands them
//! back from [`Scheduler::next`] exactly once, claimed for the extracting
//! worker.
//!
//! # Example
//!
//! ```
//! use parsched::{Scheduler, SchedulerConfig, TaskHandle, WorkerId, UNOWNED};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI16, AtomicU16, Ordering};
//!
//! #[derive(Clone)]
//! struct Job(Arc<(AtomicU16, AtomicI16)>);
//!
//! impl Job {
//!     fn new(priority: u16) -> Self {
//!         Self(Arc::new((AtomicU16::new(priority), AtomicI16::new(UNOWNED))))
//!     }
//! }
//!
//! impl TaskHandle for Job {
//!     fn priority(&self) -> u16 {
//!         self.0 .0.load(Ordering::Relaxed)
//!     }
//!     fn set_priority(&self, priority: u16) {
//!         self.0 .0.store(priority, Ordering::Relaxed);
//!     }
//!     fn owner(&self) -> Option<WorkerId> {
//!         match self.0 .1.load(Ordering::Acquire) {
//!             UNOWNED => None,
//!             tid => Some(tid as WorkerId),
//!         }
//!     }
//!     fn try_claim(&self, tid: WorkerId) -> bool {
//!         self.0
//!             .1
//!             .compare_exchange(UNOWNED, tid as i16, Ordering::AcqRel, Ordering::Acquire)
//!             .is_ok()
//!     }
//! }
//!
//! let config = SchedulerConfig {
//!     workers: 1,
//!     shard_multiplier: 1, // a single shard pops in exact priority order
//!     ..SchedulerConfig::default()
//! };
//! let scheduler: Scheduler<Job> = Scheduler::new(config);
//! let mut ctx = scheduler.worker_context(0).unwrap();
//!
//! for priority in [5, 1, 9] {
//!     scheduler.enqueue(Job::new(priority)).unwrap();
//! }
//! let order: Vec<u16> = (0..3)
//!     .map(|_| scheduler.next(&mut ctx, || None).unwrap().priority())
//!     .collect();
//! assert_eq!(order, [1, 5, 9]);
//! ```
//!
//! # Guarantees
//!
//! - Every enqueued task is returned by `next` at most once; extraction
//!   claims the task for the worker via a single compare-and-swap on its
//!   owner id.
//! - Priority order is *approximate* across shards (two-choice sampling)
//!   and exact within one shard.
//! - A worker only parks after the sleep gate has verified, inside its
//!   `checking` window, that every shard is empty; any concurrent enqueue
//!   forces the gate back awake and signals the sleepers.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod gc;
pub mod sched;
pub mod task;
pub mod util;

mod tracing_compat;

pub use clock::{CycleClock, MonotonicClock};
pub use config::SchedulerConfig;
pub use error::{Error, ErrorKind};
pub use event_loop::{EventLoop, EventLoopHandle};
pub use gc::{GcHooks, NoopGc};
pub use sched::{Scheduler, SchedulerBuilder, SleepState, WorkerContext};
pub use task::{TaskHandle, WorkerId, UNOWNED};
