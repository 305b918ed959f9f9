//! The three-state sleep gate that serializes the decision to park.
//!
//! ```text
//! awake ──(CAS)──▶ checking
//! checking ──(store)──▶ awake      (snapshot saw work)
//! checking ──(CAS)──▶ asleep       (snapshot was clean)
//! asleep ──(exchange)──▶ awake     (any enqueuer/waker)
//! ```
//!
//! The protocol loses no wakeups: a would-be sleeper runs the shard
//! snapshot inside its `checking` window and only then CASes to `asleep`;
//! an enqueuer pushes first and exchanges the state to `awake` second. A
//! push visible before the snapshot is seen by it; a push not yet visible
//! means the enqueuer's exchange lands after the sleeper reached `asleep`,
//! flipping the gate back so the park predicate fails after the
//! accompanying signal. All transitions are sequentially consistent so the
//! push cannot reorder below the exchange.

use std::sync::atomic::{AtomicU16, Ordering};

pub(crate) const AWAKE: u16 = 0;
pub(crate) const CHECKING: u16 = 1;
pub(crate) const ASLEEP: u16 = 2;

/// Observable state of the sleep gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    /// Runnable work may exist; nobody should park.
    Awake,
    /// Some worker is running the idle snapshot.
    Checking,
    /// The system was quiescent; parking is permitted.
    Asleep,
}

#[derive(Debug)]
pub(crate) struct SleepGate {
    state: AtomicU16,
}

impl SleepGate {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU16::new(AWAKE),
        }
    }

    pub(crate) fn load(&self) -> u16 {
        self.state.load(Ordering::SeqCst)
    }

    pub(crate) fn is_asleep(&self) -> bool {
        self.load() == ASLEEP
    }

    pub(crate) fn snapshot_state(&self) -> SleepState {
        match self.load() {
            AWAKE => SleepState::Awake,
            CHECKING => SleepState::Checking,
            _ => SleepState::Asleep,
        }
    }

    /// Enqueuer/waker side: forces the gate awake, returning the prior
    /// state so the caller knows whether anyone might be parked.
    pub(crate) fn force_awake(&self) -> u16 {
        self.state.swap(AWAKE, Ordering::SeqCst)
    }

    /// Sleeper side: decides whether parking is safe right now.
    ///
    /// `snapshot` must report whether every shard is empty; it runs inside
    /// this gate's `checking` window, which is what makes its unsynchronized
    /// reads sound.
    pub(crate) fn try_authorize(&self, snapshot: impl Fn() -> bool) -> bool {
        loop {
            match self.load() {
                CHECKING => {
                    // Another worker is mid-check; its verdict applies to us
                    // too.
                    let mut state = self.load();
                    while state == CHECKING {
                        std::hint::spin_loop();
                        state = self.load();
                    }
                    if state == AWAKE {
                        return false;
                    }
                    debug_assert_eq!(state, ASLEEP);
                    return true;
                }
                AWAKE => {
                    if self
                        .state
                        .compare_exchange(AWAKE, CHECKING, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        if snapshot() {
                            if self
                                .state
                                .compare_exchange(
                                    CHECKING,
                                    ASLEEP,
                                    Ordering::SeqCst,
                                    Ordering::SeqCst,
                                )
                                .is_ok()
                            {
                                return true;
                            }
                            // A waker tore us out of `checking`; re-run the
                            // whole protocol.
                        } else {
                            // Plain store: only the holder of `checking` may
                            // leave it this way, and that is us.
                            self.state.store(AWAKE, Ordering::SeqCst);
                            return false;
                        }
                    }
                }
                _ => return true, // asleep already
            }
        }
    }
}
