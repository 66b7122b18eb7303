//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Default lock staleness threshold in milliseconds.
///
/// A lock record older than this is treated as abandoned by a crashed
/// holder and may be overwritten by the next process attempting execution.
pub const DEFAULT_LOCK_TTL_MS: u64 = 60_000;

/// Configuration for a [`SchedulerRegistry`](crate::SchedulerRegistry).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether this process is the cluster's designated executor.
    ///
    /// Supplied by the host process topology (true for exactly one worker
    /// in the pool); the registry never computes this itself.
    pub is_executor: bool,
    /// Identity written into lock records (e.g. `"pid:1234"`).
    pub holder_id: String,
    /// Lock staleness threshold in milliseconds.
    pub lock_ttl_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            is_executor: false,
            holder_id: format!("pid:{}", std::process::id()),
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
        }
    }
}

impl SchedulerConfig {
    /// Config for the cluster's executor process.
    #[must_use]
    pub fn executor() -> Self {
        Self {
            is_executor: true,
            ..Self::default()
        }
    }
}
