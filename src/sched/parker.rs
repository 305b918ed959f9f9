//! Per-worker park slots.
//!
//! Each worker owns one mutex + condition-variable pair. The wait predicate
//! is the global sleep gate (a worker stays parked exactly while the gate
//! reads asleep), so spurious wakes and stale signals are harmless. Wakers
//! take the slot mutex around `notify_one`; without it a signal could land
//! between the sleeper's predicate check and its wait and be lost.

use crate::sched::sleep::SleepGate;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub(crate) struct ParkSlot {
    mutex: Mutex<()>,
    cvar: Condvar,
}

impl ParkSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park-slot state is `()`; a poisoned mutex carries nothing to
    /// invalidate, so waking must keep working after a panicking thread.
    fn lock_unpoisoned(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks the calling worker while the gate reads asleep.
    pub(crate) fn park_while_asleep(&self, gate: &SleepGate) {
        let mut guard = self.lock_unpoisoned();
        while gate.is_asleep() {
            guard = self
                .cvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(guard);
    }

    /// Signals the slot's condition variable under its mutex.
    pub(crate) fn signal(&self) {
        let _guard = self.lock_unpoisoned();
        self.cvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn park_returns_immediately_when_gate_awake() {
        let slot = ParkSlot::new();
        let gate = SleepGate::new();
        // Gate starts awake: predicate is false, no wait happens.
        slot.park_while_asleep(&gate);
    }

    #[test]
    fn park_blocks_until_gate_flips() {
        let slot = Arc::new(ParkSlot::new());
        let gate = Arc::new(SleepGate::new());
        assert!(gate.try_authorize(|| true), "gate should go asleep");

        let unparked = Arc::new(AtomicBool::new(false));
        let s = Arc::clone(&slot);
        let g = Arc::clone(&gate);
        let u = Arc::clone(&unparked);
        let sleeper = thread::spawn(move || {
            s.park_while_asleep(&g);
            u.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(
            !unparked.load(Ordering::SeqCst),
            "worker must stay parked while the gate is asleep"
        );

        gate.force_awake();
        slot.signal();
        sleeper.join().expect("sleeper thread");
        assert!(unparked.load(Ordering::SeqCst));
    }

    #[test]
    fn stray_signal_does_not_release_parked_worker() {
        let slot = Arc::new(ParkSlot::new());
        let gate = Arc::new(SleepGate::new());
        assert!(gate.try_authorize(|| true));

        let unparked = Arc::new(AtomicBool::new(false));
        let s = Arc::clone(&slot);
        let g = Arc::clone(&gate);
        let u = Arc::clone(&unparked);
        let sleeper = thread::spawn(move || {
            s.park_while_asleep(&g);
            u.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(10));
        // Signal without flipping the gate: the predicate still holds, so
        // the worker re-waits.
        slot.signal();
        thread::sleep(Duration::from_millis(10));
        assert!(
            !unparked.load(Ordering::SeqCst),
            "signal without a state change must not release the worker"
        );

        gate.force_awake();
        slot.signal();
        sleeper.join().expect("sleeper thread");
    }

    #[test]
    fn wake_before_park_is_not_lost() {
        // The gate flips awake before the worker reaches the slot: the
        // predicate check catches it and park returns without a signal.
        let slot = ParkSlot::new();
        let gate = SleepGate::new();
        assert!(gate.try_authorize(|| true));
        gate.force_awake();
        slot.park_while_asleep(&gate);
    }

    #[test]
    fn signal_storm_is_benign() {
        let slot = ParkSlot::new();
        for _ in 0..64 {
            slot.signal();
        }
        // Nothing was parked; the signals evaporate without effect.
    }
}
