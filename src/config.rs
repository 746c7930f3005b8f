//! Configuration: granularity table, batch sizes, and the injectable
//! clock. The engine takes all of this by value — no global state, no
//! process-wide config singleton.
//!
//! Modeled after a per-table chunk-size override
//! (`AHashMap<String, usize>` keyed by table name), generalized here
//! to the engine's batch-size and cursor-prefetch knobs.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// One granularity's bucketing width, retention policy, and
/// real-time-splice flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GranularityConfig {
    /// Identifier used in the `granularity` column and in log fields,
    /// e.g. `"15min"`, `"1h"`, `"1d"`, analogous to a periodic-state
    /// resolution's rename tag (`"15m"`, `"1h"`, ...).
    pub suffix: &'static str,
    /// Bucket width used by the external bucketing primitive; stored
    /// for documentation/validation, not evaluated by this crate.
    pub interval: Duration,
    /// `None` means retain cache rows indefinitely.
    pub cache_retention: Option<Duration>,
    /// When true, the query path additionally splices raw
    /// (unbucketed) prices newer than the latest bucket edge.
    pub include_realtime: bool,
}

impl GranularityConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.suffix.is_empty()
            || !self
                .suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(format!(
                "granularity suffix {:?} must be non-empty ASCII alphanumeric \
                 (it is embedded in cache row primary keys)",
                self.suffix
            ));
        }
        Ok(())
    }
}

/// The finite ordered list of granularities the engine materializes.
/// Order is preserved because `refresh()` walks it in order.
#[derive(Clone, Debug, Default)]
pub struct GranularityTable(pub Vec<GranularityConfig>);

impl GranularityTable {
    pub fn new(granularities: Vec<GranularityConfig>) -> Result<Self, String> {
        for g in &granularities {
            g.validate()?;
        }
        Ok(Self(granularities))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GranularityConfig> {
        self.0.iter()
    }

    pub fn get(&self, suffix: &str) -> Option<&GranularityConfig> {
        self.0.iter().find(|g| g.suffix == suffix)
    }
}

/// Injectable wall clock for retention GC. Production code uses
/// `SystemClock`; tests use a fixed clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always returns a fixed instant, for deterministic
/// retention-GC tests.
#[derive(Clone, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Batch sizes and cursor prefetch: bounded batches (configurable,
/// e.g. 1,000 rows) rather than unbounded scans.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub granularities: GranularityTable,
    /// Upsert batch size, forwarded to `batch_upsert`'s `batch_size` param.
    pub upsert_batch_size: usize,
    /// Cursor prefetch size for bounded-page reads.
    pub cursor_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            granularities: GranularityTable::default(),
            upsert_batch_size: 1_000,
            cursor_batch_size: 1_000,
        }
    }
}
