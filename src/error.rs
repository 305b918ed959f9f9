//! Error types for the scheduler.
//!
//! Errors here are explicit and typed; contention is never an error (it is
//! recovered locally by resampling shards), so the only failures that reach
//! callers are configuration mistakes:
//!
//! - A full shard at insert means the fixed per-shard capacity was sized too
//!   small for the workload. The embedding runtime is expected to treat this
//!   as fatal.
//! - A worker id outside the configured pool.
//! - A malformed environment override.

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A shard was full at insert. Capacity is fixed at configuration time,
    /// so overflow indicates a misconfiguration; the embedder should abort.
    CapacityExceeded,
    /// A worker id outside `[0, workers)` was supplied.
    InvalidWorker,
    /// Invalid configuration value (bad environment override, out-of-range
    /// field).
    Config,
}

impl ErrorKind {
    /// Short static description of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CapacityExceeded => "shard capacity exceeded",
            Self::InvalidWorker => "invalid worker id",
            Self::Config => "invalid configuration",
        }
    }
}

/// An error raised by the scheduler.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<String>,
}

impl Error {
    /// Creates an error with no detail text.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    /// Creates an error carrying context for the report.
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self.kind.as_str()),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

impl std::error::Error for Error {}
