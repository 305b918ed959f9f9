//! Garbage-collector coordination seam.
//!
//! Workers declare themselves to the collector at the top of every dispatch
//! iteration (`safepoint`) and bracket the blocking condition-variable wait
//! with a safe region so a stop-the-world phase never waits on a parked
//! thread. Runtimes without a collector use [`NoopGc`].

/// Hooks the embedding runtime's collector provides to the scheduler.
pub trait GcHooks: Send + Sync + 'static {
    /// Poll point at the top of the dispatch loop; may block inside the
    /// collector during a stop-the-world phase.
    fn safepoint(&self) {}

    /// Entered immediately before a worker blocks on its park slot.
    fn enter_safe_region(&self) {}

    /// Left immediately after the worker resumes.
    fn leave_safe_region(&self) {}
}

/// No-op hooks for runtimes without a collector.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGc;

impl GcHooks for NoopGc {}
