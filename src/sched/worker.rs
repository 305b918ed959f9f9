//! Worker-side dispatch: the procedure a worker runs to obtain its next
//! runnable task.
//!
//! Per call the worker tries, in order: the sticky probe (a continuation
//! pinned to this worker), a multi-queue extraction, an opportunistic
//! non-blocking event-loop pump every `pump_interval` fruitless spins, and
//! finally, once `sleep_threshold` idle cycles have passed and the sleep
//! gate authorizes it, either one blocking drive of the event loop (one
//! winner) or a park on its slot (everyone else).

use crate::sched::sleep;
use crate::sched::Scheduler;
use crate::task::{TaskHandle, WorkerId};
use crate::tracing_compat::trace;
use crate::util::SampleRng;
use std::sync::atomic::Ordering;

/// Per-worker dispatch state: the worker's id and its shard-sampling RNG.
#[derive(Debug)]
pub struct WorkerContext {
    tid: WorkerId,
    rng: SampleRng,
}

impl WorkerContext {
    pub(crate) fn new(tid: WorkerId) -> Self {
        Self {
            tid,
            rng: SampleRng::for_stream(u64::from(tid)),
        }
    }

    /// This worker's id in `[0, workers)`.
    #[must_use]
    pub fn tid(&self) -> WorkerId {
        self.tid
    }

    pub(crate) fn rng(&mut self) -> &mut SampleRng {
        &mut self.rng
    }
}

impl<T: TaskHandle> Scheduler<T> {
    /// Blocks until a runnable task is claimed for this worker, or until
    /// shutdown is observed (`None`).
    ///
    /// `sticky` may return a task pinned to this worker (a resumed
    /// continuation with a pinned stack); it bypasses the multi-queue
    /// entirely and must only ever produce tasks that are unowned or
    /// already owned by this worker.
    pub fn next<F>(&self, ctx: &mut WorkerContext, mut sticky: F) -> Option<T>
    where
        F: FnMut() -> Option<T>,
    {
        let mut spin_count: u32 = 0;
        // Cycle stamp of the first fruitless probe; zero means the idle
        // timer has not started.
        let mut idle_since: u64 = 0;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            self.gc.safepoint();

            if let Some(task) = self.poll_runnable(ctx, &mut sticky) {
                return Some(task);
            }

            spin_count += 1;
            if spin_count > self.config.pump_interval {
                if let Some(event_loop) = &self.event_loop {
                    // After some delay, check the kernel for new events too,
                    // but not while another thread is watching the loop.
                    if event_loop.waiters() == 0 {
                        spin_count = 0;
                        let _ = event_loop.pump();
                        if let Some(task) = self.poll_runnable(ctx, &mut sticky) {
                            return Some(task);
                        }
                    }
                }
            }
            std::hint::spin_loop();

            if self.sleep_authorized(&mut idle_since) {
                if let Some(task) = self.poll_runnable(ctx, &mut sticky) {
                    return Some(task);
                }
                if let Some(event_loop) = &self.event_loop {
                    // One worker wins this race and watches the event loop.
                    if event_loop.drive_blocking() {
                        if let Some(task) = self.poll_runnable(ctx, &mut sticky) {
                            return Some(task);
                        }
                        if self.gate.load() != sleep::ASLEEP {
                            idle_since = 0;
                            continue;
                        }
                        // The gate still reads asleep, so this was a wake
                        // meant to take the loop from us. Park and let the
                        // other thread have it without conflict.
                    }
                }
                trace!(worker = usize::from(ctx.tid), "parking");
                self.gc.enter_safe_region();
                self.slots[usize::from(ctx.tid)].park_while_asleep(&self.gate);
                self.gc.leave_safe_region();
                trace!(worker = usize::from(ctx.tid), "unparked");
                idle_since = 0;
            }
        }
    }

    /// Sticky probe, then multi-queue extraction.
    fn poll_runnable<F>(&self, ctx: &mut WorkerContext, sticky: &mut F) -> Option<T>
    where
        F: FnMut() -> Option<T>,
    {
        if let Some(task) = sticky() {
            if task.owner() != Some(ctx.tid) {
                let _ = task.try_claim(ctx.tid);
            }
            return Some(task);
        }
        self.queue.extract(ctx.tid, ctx.rng())
    }

    /// Threshold check plus the sleep-gate protocol. Returns whether this
    /// worker may park right now.
    fn sleep_authorized(&self, idle_since: &mut u64) -> bool {
        let threshold = self.config.sleep_threshold;
        if threshold == 0 {
            // Never park; workers spin forever.
            return false;
        }
        if *idle_since == 0 {
            *idle_since = self.clock.cycles();
            return false;
        }
        if self.clock.cycles().wrapping_sub(*idle_since) < threshold {
            return false;
        }
        if self.gate.try_authorize(|| self.queue.is_idle()) {
            true
        } else {
            *idle_since = 0;
            false
        }
    }
}
