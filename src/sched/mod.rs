//! The scheduler: sharded multi-queue, sleep gate, park slots, and the
//! worker dispatch loop.
//!
//! Construction fixes every size at init: worker count, shard count
//! (`shard_multiplier * workers`), per-shard capacity, heap arity. Tasks
//! flow in through [`Scheduler::enqueue`] from any thread and out through
//! [`Scheduler::next`] on worker threads, each holding a [`WorkerContext`].

mod multiqueue;
mod parker;
mod shard;
mod sleep;
mod worker;

pub use sleep::SleepState;
pub use worker::WorkerContext;

use crate::clock::{CycleClock, MonotonicClock};
use crate::config::SchedulerConfig;
use crate::error::{Error, ErrorKind};
use crate::event_loop::EventLoopHandle;
use crate::gc::{GcHooks, NoopGc};
use crate::sched::multiqueue::MultiQueue;
use crate::sched::parker::ParkSlot;
use crate::sched::sleep::SleepGate;
use crate::task::{TaskHandle, WorkerId};
use crate::tracing_compat::debug;
use crate::util::SampleRng;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static ENQUEUE_SEED: AtomicU64 = AtomicU64::new(0x517c_c1b7_2722_0a95);

thread_local! {
    // Enqueue-side shard sampling state. Workers are OS threads, so this is
    // "the worker's RNG" on worker threads and a private stream on any
    // other thread that enqueues.
    static ENQUEUE_RNG: RefCell<SampleRng> = RefCell::new(SampleRng::new(
        ENQUEUE_SEED.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed),
    ));
}

/// The multi-queue scheduler. Generic over the embedding runtime's task
/// handle type.
pub struct Scheduler<T: TaskHandle> {
    queue: MultiQueue<T>,
    gate: SleepGate,
    slots: Box<[ParkSlot]>,
    event_loop: Option<EventLoopHandle>,
    clock: Arc<dyn CycleClock>,
    gc: Arc<dyn GcHooks>,
    shutdown: AtomicBool,
    config: SchedulerConfig,
}

impl<T: TaskHandle> Scheduler<T> {
    /// Creates a scheduler with default collaborators (monotonic clock, no
    /// GC, no event loop).
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        SchedulerBuilder::new(config).build()
    }

    /// Starts a builder for wiring in collaborators.
    #[must_use]
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    /// Inserts a task keyed by its current priority and wakes the workers.
    ///
    /// Callable from any thread, including non-workers and event-loop
    /// callbacks.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::CapacityExceeded`] when the sampled shard is full. The
    /// embedding runtime should treat this as fatal: capacity is fixed at
    /// configuration time, so overflow means the deployment was missized.
    pub fn enqueue(&self, task: T) -> Result<(), Error> {
        ENQUEUE_RNG.with(|rng| self.queue.insert(task, &mut rng.borrow_mut()))?;
        self.wake_any();
        Ok(())
    }

    /// Re-keys the task to `priority`, then enqueues it.
    ///
    /// # Errors
    ///
    /// As for [`Scheduler::enqueue`].
    pub fn enqueue_with_priority(&self, task: T, priority: u16) -> Result<(), Error> {
        task.set_priority(priority);
        self.enqueue(task)
    }

    /// Ensures worker `tid` is not parked.
    ///
    /// The baseline wakes every worker, not just `tid`: a targeted signal
    /// would leave the gate awake with other workers still parked, and a
    /// later enqueue, seeing the gate already awake, would signal nobody.
    /// On an already-awake system this is a no-op apart from benign extra
    /// signals.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidWorker`] when `tid` is out of range.
    pub fn wake(&self, tid: WorkerId) -> Result<(), Error> {
        if usize::from(tid) >= self.slots.len() {
            return Err(Error::with_detail(
                ErrorKind::InvalidWorker,
                format!("worker {tid} of {}", self.slots.len()),
            ));
        }
        self.wake_any();
        Ok(())
    }

    /// Enqueuer-side wake: forces the gate awake and, if anyone might have
    /// been checking or parked, signals every slot. The baseline broadcasts
    /// rather than targeting one worker. Skipped entirely when parking is
    /// disabled, except for the event-loop interrupt.
    pub(crate) fn wake_any(&self) {
        let prior = self.gate.force_awake();
        if self.config.sleep_threshold != 0 && prior != sleep::AWAKE {
            for slot in &*self.slots {
                slot.signal();
            }
        }
        if let Some(event_loop) = &self.event_loop {
            event_loop.interrupt();
        }
    }

    /// Requests shutdown: all current and future [`Scheduler::next`] calls
    /// return `None` once they observe the flag. Parked workers are
    /// released and a worker blocked in the event loop is interrupted.
    pub fn shutdown(&self) {
        debug!("scheduler shutdown requested");
        self.shutdown.store(true, Ordering::SeqCst);
        self.gate.force_awake();
        for slot in &*self.slots {
            slot.signal();
        }
        if let Some(event_loop) = &self.event_loop {
            event_loop.interrupt();
        }
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Current state of the sleep gate.
    #[must_use]
    pub fn sleep_state(&self) -> SleepState {
        self.gate.snapshot_state()
    }

    /// Configured worker count `P`.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Total shard count `c * P`.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.queue.shard_count()
    }

    /// The normalized configuration this scheduler runs with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Creates the dispatch context for worker `tid`, seeding its sampling
    /// RNG from the id.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidWorker`] when `tid >= workers`.
    pub fn worker_context(&self, tid: WorkerId) -> Result<WorkerContext, Error> {
        if usize::from(tid) >= self.config.workers {
            return Err(Error::with_detail(
                ErrorKind::InvalidWorker,
                format!("worker {tid} of {}", self.config.workers),
            ));
        }
        Ok(WorkerContext::new(tid))
    }

    /// Visits every task currently sitting in a shard, taking no locks.
    /// There is no second task index; traversal walks the shards directly.
    ///
    /// # Safety
    ///
    /// Stop-the-world only: every mutator must be suspended at a safepoint
    /// or parked in a safe region for the duration of the call.
    pub unsafe fn mark_enqueued(&self, visitor: impl FnMut(&T)) {
        unsafe { self.queue.for_each_enqueued(visitor) };
    }
}

impl<T: TaskHandle> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.config.workers)
            .field("shards", &self.queue.shard_count())
            .field("sleep_state", &self.gate.snapshot_state())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Wires collaborators into a [`Scheduler`].
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    clock: Option<Arc<dyn CycleClock>>,
    gc: Option<Arc<dyn GcHooks>>,
    event_loop: Option<EventLoopHandle>,
}

impl SchedulerBuilder {
    /// Starts from the given configuration; it is normalized at build time.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            clock: None,
            gc: None,
            event_loop: None,
        }
    }

    /// Sets the cycle counter used for the sleep threshold.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn CycleClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the collector hooks bracketing safepoints and parking.
    #[must_use]
    pub fn gc_hooks(mut self, gc: Arc<dyn GcHooks>) -> Self {
        self.gc = Some(gc);
        self
    }

    /// Attaches the external event loop.
    #[must_use]
    pub fn event_loop(mut self, handle: EventLoopHandle) -> Self {
        self.event_loop = Some(handle);
        self
    }

    /// Builds the scheduler.
    #[must_use]
    pub fn build<T: TaskHandle>(self) -> Scheduler<T> {
        let mut config = self.config;
        config.normalize();
        debug!(
            workers = config.workers,
            shards = config.shard_count(),
            capacity = config.shard_capacity,
            arity = config.heap_arity,
            "scheduler initialized"
        );
        Scheduler {
            queue: MultiQueue::new(
                config.shard_count(),
                config.shard_capacity,
                config.heap_arity,
            ),
            gate: SleepGate::new(),
            slots: (0..config.workers).map(|_| ParkSlot::new()).collect(),
            event_loop: self.event_loop,
            clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            gc: self.gc.unwrap_or_else(|| Arc::new(NoopGc)),
            shutdown: AtomicBool::new(false),
            config,
        }
    }
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("has_event_loop", &self.event_loop.is_some())
            .finish_non_exhaustive()
    }
}
