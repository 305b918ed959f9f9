//! External event-loop integration.
//!
//! The embedding runtime owns a single-threaded event loop (timers, I/O,
//! async callbacks). Exactly one worker at a time may drive it: ownership is
//! a `try_lock` on the handle's guard mutex, so a worker that loses the race
//! parks instead of contending. Wakers interrupt a blocked iteration with
//! the loop's cross-thread wake, unless the waking thread is itself the
//! current driver (an enqueue from inside a loop callback), in which case it
//! calls [`EventLoop::stop`] so the iteration returns once the callback
//! unwinds.

use parking_lot::Mutex;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One iteration's worth of an external event loop.
///
/// Implementations use interior mutability: the handle's guard mutex is what
/// serializes `run_once_*`, and `stop` / `cross_thread_wake` must be safe to
/// call from any thread at any time (they typically set a flag and signal).
pub trait EventLoop: Send + Sync + 'static {
    /// Runs one loop iteration, blocking until at least one event fires, the
    /// loop is stopped, or a cross-thread wake arrives. Implementations
    /// should clear any pending stop flag on entry.
    fn run_once_blocking(&self);

    /// Processes already-pending events without blocking. Returns whether
    /// anything ran.
    fn run_once_nonblocking(&self) -> bool;

    /// Asks the current (or next) blocking iteration to return early.
    /// Called by a thread that is itself driving the loop.
    fn stop(&self);

    /// Interrupts a blocking iteration from another thread.
    fn cross_thread_wake(&self);
}

/// Process-unique token for the calling thread, used to recognize whether
/// the waker is the thread currently driving the loop.
fn current_thread_token() -> usize {
    static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);
    thread_local! {
        static TOKEN: Cell<usize> = const { Cell::new(0) };
    }
    TOKEN.with(|token| {
        if token.get() == 0 {
            token.set(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

const NO_HOLDER: usize = 0;

/// The scheduler's view of the external event loop: the loop itself, the
/// global guard mutex, and bookkeeping for the wake and pump decisions.
pub struct EventLoopHandle {
    driver: Arc<dyn EventLoop>,
    guard: Mutex<()>,
    /// Thread token of the current driver, or [`NO_HOLDER`].
    holder: AtomicUsize,
    /// Threads currently blocked watching the loop. The opportunistic
    /// non-blocking pump on the spin path is skipped while this is non-zero.
    waiters: AtomicUsize,
}

impl EventLoopHandle {
    /// Wraps an event loop for the scheduler.
    #[must_use]
    pub fn new(driver: Arc<dyn EventLoop>) -> Self {
        Self {
            driver,
            guard: Mutex::new(()),
            holder: AtomicUsize::new(NO_HOLDER),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Number of threads currently blocked on the loop.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    /// Registers an external waiter (a thread outside the scheduler that is
    /// blocked on loop progress); the guard unregisters on drop. While any
    /// waiter is registered, workers stop pumping the loop opportunistically.
    #[must_use]
    pub fn add_waiter(&self) -> WaiterGuard<'_> {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        WaiterGuard { handle: self }
    }

    /// Processes pending events without blocking, if the loop is free.
    /// Returns whether an event ran.
    pub(crate) fn pump(&self) -> bool {
        let Some(_guard) = self.guard.try_lock() else {
            return false;
        };
        let token = current_thread_token();
        self.holder.store(token, Ordering::Release);
        let ran = self.driver.run_once_nonblocking();
        self.holder.store(NO_HOLDER, Ordering::Release);
        ran
    }

    /// Drives one blocking iteration, if this thread wins the loop mutex.
    /// Returns whether it drove the loop; `false` means another worker is
    /// already watching it and the caller should park instead.
    pub(crate) fn drive_blocking(&self) -> bool {
        let Some(_guard) = self.guard.try_lock() else {
            return false;
        };
        let token = current_thread_token();
        self.holder.store(token, Ordering::Release);
        self.waiters.fetch_add(1, Ordering::AcqRel);
        self.driver.run_once_blocking();
        self.waiters.fetch_sub(1, Ordering::AcqRel);
        self.holder.store(NO_HOLDER, Ordering::Release);
        true
    }

    /// Interrupts a (possibly) blocked loop. A thread that is itself the
    /// current driver (waking from inside a loop callback), which flags the
    /// iteration to stop; every other thread uses the cross-thread wake.
    pub(crate) fn interrupt(&self) {
        if self.holder.load(Ordering::Acquire) == current_thread_token() {
            self.driver.stop();
        } else {
            self.driver.cross_thread_wake();
        }
    }
}

impl fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("held", &(self.holder.load(Ordering::Relaxed) != NO_HOLDER))
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Unregisters an external loop waiter on drop.
#[derive(Debug)]
pub struct WaiterGuard<'a> {
    handle: &'a EventLoopHandle,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.handle.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}
