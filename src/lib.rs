//! Lockstep: clustered recurring-task scheduler.
//!
//! A registry of named, cron-scheduled callbacks that run exactly once per
//! firing, from exactly one process, even when the host application runs
//! as a pool of near-identical worker processes sharing the same in-code
//! task registrations.
//!
//! # Architecture
//!
//! Coordination happens through a shared key-value store, the only
//! cross-process primitive:
//! - **[`KvStore`]**: last-write-wins get/set/delete; holds per-task lock
//!   records and introspection metadata
//! - **[`TriggerEngine`]**: fires callbacks at cron instants
//!   ([`CronEngine`] is the built-in implementation)
//! - **[`JobObserver`]**: optional execution-lifecycle reporting
//! - **[`ScheduledTask`]**: one task's definition plus the per-firing
//!   locked execution protocol
//! - **[`SchedulerRegistry`]**: per-process task set, executor gating, and
//!   owner-scoped registration/teardown for plugin lifecycles
//!
//! # Example
//!
//! ```no_run
//! use lockstep::{CronEngine, MemoryStore, SchedulerConfig, SchedulerRegistry};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let registry = SchedulerRegistry::new(
//!     SchedulerConfig::executor(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(CronEngine::new()),
//! );
//!
//! // Plugin init runs inside an owner scope; its tasks can later be torn
//! // down together when the plugin deactivates.
//! let scope = registry.for_owner("backup-plugin");
//! scope
//!     .call(|| async { Ok(()) }, Some("nightly-backup"))
//!     .daily_at("02:00");
//!
//! registry.start_all();
//! # registry.teardown_tasks_by_owner("backup-plugin").await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observer;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod task;
pub mod trigger;

pub use config::{DEFAULT_LOCK_TTL_MS, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use observer::{JobDescriptor, JobObserver, JobPatch, JobStatus, LogObserver};
pub use registry::{OwnerScope, SchedulerRegistry, TaskMetadata};
pub use schedule::ScheduleSpec;
pub use store::{FileStore, KvStore, MemoryStore};
pub use task::{LockRecord, ScheduledTask, TaskInfo, TaskStatus, UNOWNED};
pub use trigger::{CronEngine, FireFn, TriggerEngine, TriggerHandle};
