//! Scheduler configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `workers` | available CPU parallelism |
//! | `sleep_threshold` | 4,000,000 cycles |
//! | `shard_multiplier` | 4 |
//! | `shard_capacity` | 8192 |
//! | `heap_arity` | 8 |
//! | `pump_interval` | 1000 spins |
//!
//! A `sleep_threshold` of zero disables parking entirely: workers spin
//! forever, which is the right trade for latency-critical deployments. The
//! environment override accepts the literal string `infinite` for the same
//! effect.
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PARSCHED_WORKERS` | `workers` |
//! | `PARSCHED_SLEEP_THRESHOLD` | `sleep_threshold` (u64 cycles or `infinite`) |
//! | `PARSCHED_SHARD_MULTIPLIER` | `shard_multiplier` |
//! | `PARSCHED_SHARD_CAPACITY` | `shard_capacity` |
//! | `PARSCHED_HEAP_ARITY` | `heap_arity` |
//! | `PARSCHED_PUMP_INTERVAL` | `pump_interval` |

use crate::error::{Error, ErrorKind};
use crate::tracing_compat::warn;

/// Cycles of idle spinning before a worker considers parking.
pub const DEFAULT_SLEEP_THRESHOLD: u64 = 4_000_000;

/// Workers may not exceed the positive range of the 16-bit owner id.
const MAX_WORKERS: usize = i16::MAX as usize;

/// Scheduler construction parameters. All sizes are fixed at init; shards
/// never grow or shrink afterwards.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads `P` (default: available parallelism).
    pub workers: usize,
    /// Idle cycles before the sleep check runs; zero means never park.
    pub sleep_threshold: u64,
    /// Shard count is `shard_multiplier * workers`.
    pub shard_multiplier: usize,
    /// Fixed capacity of each shard's heap.
    pub shard_capacity: usize,
    /// Arity `d` of the per-shard d-ary min-heap.
    pub heap_arity: usize,
    /// Fruitless spins between opportunistic event-loop pumps.
    pub pump_interval: u32,
}

impl SchedulerConfig {
    /// Total shard count for this configuration.
    #[must_use]
    pub const fn shard_count(&self) -> usize {
        self.shard_multiplier * self.workers
    }

    /// Clamps degenerate values to safe minimums.
    pub fn normalize(&mut self) {
        if self.workers == 0 {
            self.workers = 1;
        }
        if self.workers > MAX_WORKERS {
            warn!(
                requested = self.workers,
                "worker count exceeds the 16-bit owner id range, clamping"
            );
            self.workers = MAX_WORKERS;
        }
        if self.shard_multiplier == 0 {
            self.shard_multiplier = 1;
        }
        if self.shard_capacity == 0 {
            self.shard_capacity = 1;
        }
        // The shard occupancy counter is 16 bits wide.
        if self.shard_capacity > usize::from(u16::MAX) {
            self.shard_capacity = usize::from(u16::MAX);
        }
        if self.heap_arity < 2 {
            self.heap_arity = 2;
        }
        if self.pump_interval == 0 {
            self.pump_interval = 1;
        }
    }

    /// Builds a configuration from defaults plus `PARSCHED_*` environment
    /// overrides, normalized.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Config`] when an override is present but
    /// unparseable.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.normalize();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), Error> {
        if let Some(value) = env_var("PARSCHED_WORKERS") {
            self.workers = parse_usize(&value, "PARSCHED_WORKERS")?;
        }
        if let Some(value) = env_var("PARSCHED_SLEEP_THRESHOLD") {
            self.sleep_threshold = if value.eq_ignore_ascii_case("infinite") {
                0
            } else {
                parse_u64(&value, "PARSCHED_SLEEP_THRESHOLD")?
            };
        }
        if let Some(value) = env_var("PARSCHED_SHARD_MULTIPLIER") {
            self.shard_multiplier = parse_usize(&value, "PARSCHED_SHARD_MULTIPLIER")?;
        }
        if let Some(value) = env_var("PARSCHED_SHARD_CAPACITY") {
            self.shard_capacity = parse_usize(&value, "PARSCHED_SHARD_CAPACITY")?;
        }
        if let Some(value) = env_var("PARSCHED_HEAP_ARITY") {
            self.heap_arity = parse_usize(&value, "PARSCHED_HEAP_ARITY")?;
        }
        if let Some(value) = env_var("PARSCHED_PUMP_INTERVAL") {
            self.pump_interval = parse_u32(&value, "PARSCHED_PUMP_INTERVAL")?;
        }
        Ok(())
    }

    pub(crate) fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            sleep_threshold: DEFAULT_SLEEP_THRESHOLD,
            shard_multiplier: 4,
            shard_capacity: 8192,
            heap_arity: 8,
            pump_interval: 1000,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_usize(value: &str, key: &str) -> Result<usize, Error> {
    value
        .parse()
        .map_err(|_| Error::with_detail(ErrorKind::Config, format!("{key}={value}")))
}

fn parse_u64(value: &str, key: &str) -> Result<u64, Error> {
    value
        .parse()
        .map_err(|_| Error::with_detail(ErrorKind::Config, format!("{key}={value}")))
}

fn parse_u32(value: &str, key: &str) -> Result<u32, Error> {
    value
        .parse()
        .map_err(|_| Error::with_detail(ErrorKind::Config, format!("{key}={value}")))
}
