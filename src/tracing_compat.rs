//! Event-macro facade over the optional `tracing` dependency.
//!
//! Scheduler hot paths log through this module so that builds without the
//! `tracing` feature compile the call sites down to nothing. With the
//! feature enabled (the default), the macros are the `tracing` crate's own.

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use trace;
#[cfg(not(feature = "tracing"))]
pub(crate) use warn_noop as warn;
