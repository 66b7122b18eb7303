//! Task registry: per-process ownership of scheduled tasks.
//!
//! Every worker process builds the same registry from the same in-code
//! registrations, but only the cluster's designated executor starts
//! triggers and persists task metadata. Owner scoping ties tasks to the
//! plugin/theme that registered them so deactivation can tear down exactly
//! that plugin's tasks.

use crate::config::SchedulerConfig;
use crate::observer::JobObserver;
use crate::schedule::ScheduleSpec;
use crate::store::KvStore;
use crate::task::{ScheduledTask, TaskCallback, TaskInfo, UNOWNED, meta_key, now_epoch_millis};
use crate::trigger::TriggerEngine;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Persisted task metadata, keyed by task name.
///
/// Written only by the executor, for cross-process introspection; never
/// consulted for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Task name.
    pub name: String,
    /// Owning plugin/theme slug, or `"none"`.
    pub owner: String,
    /// Configured schedule, if any at persist time.
    pub schedule: Option<ScheduleSpec>,
    /// Whether concurrent firings are permitted.
    pub allow_overlap: bool,
    /// Epoch milliseconds when the task was registered.
    pub registered_at_ms: u64,
}

/// Registry of scheduled tasks for one process.
pub struct SchedulerRegistry {
    config: SchedulerConfig,
    store: Arc<dyn KvStore>,
    engine: Arc<dyn TriggerEngine>,
    observer: Option<Arc<dyn JobObserver>>,
    tasks: Mutex<Vec<Arc<ScheduledTask>>>,
}

impl SchedulerRegistry {
    /// Create a registry over the given store and trigger engine.
    ///
    /// `config.is_executor` must be true for exactly one process in the
    /// cluster; the registry never elects itself.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn KvStore>,
        engine: Arc<dyn TriggerEngine>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            observer: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach a job observer; each firing is then reported as a job.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Whether this process is the cluster's executor.
    #[must_use]
    pub fn is_executor(&self) -> bool {
        self.config.is_executor
    }

    fn tasks_guard(&self) -> MutexGuard<'_, Vec<Arc<ScheduledTask>>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Scope task registration to a plugin/theme owner.
    ///
    /// The lifecycle orchestrator wraps a plugin's init code in
    /// `registry.for_owner(slug)` so every task registered inside the
    /// window carries the owner; tasks registered through
    /// [`call`](Self::call) directly stay unowned.
    #[must_use]
    pub fn for_owner(&self, owner: impl Into<String>) -> OwnerScope<'_> {
        OwnerScope {
            registry: self,
            owner: owner.into(),
        }
    }

    /// Register a task under no owner. See [`OwnerScope::call`] for
    /// owner-scoped registration.
    ///
    /// The returned task is configured by chaining schedule-builder
    /// methods; it does not fire until [`start_all`](Self::start_all).
    pub fn call<F, Fut>(&self, callback: F, name: Option<&str>) -> Arc<ScheduledTask>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(UNOWNED.to_owned(), boxed(callback), name)
    }

    fn register(&self, owner: String, callback: TaskCallback, name: Option<&str>) -> Arc<ScheduledTask> {
        let name = name
            .map(str::to_owned)
            .unwrap_or_else(|| format!("task-{}", uuid::Uuid::new_v4()));

        let task = Arc::new(ScheduledTask::new(
            owner,
            name,
            callback,
            Arc::clone(&self.store),
            self.observer.clone(),
            self.config.holder_id.clone(),
            self.config.lock_ttl_ms,
        ));
        self.tasks_guard().push(Arc::clone(&task));

        if self.config.is_executor {
            // Fire-and-forget; the snapshot is taken when the spawned
            // future runs, after a synchronous builder chain completed.
            let store = Arc::clone(&self.store);
            let task_ref = Arc::clone(&task);
            tokio::spawn(async move {
                let info = task_ref.info();
                let metadata = TaskMetadata {
                    name: info.name.clone(),
                    owner: info.owner,
                    schedule: info.schedule,
                    allow_overlap: info.allow_overlap,
                    registered_at_ms: now_epoch_millis(),
                };
                let value = match serde_json::to_value(&metadata) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(task = %info.name, error = %e, "failed to encode task metadata");
                        return;
                    }
                };
                if let Err(e) = store.set(&meta_key(&info.name), value).await {
                    warn!(task = %info.name, error = %e, "failed to persist task metadata");
                }
            });
        }

        task
    }

    /// Start every registered task. No-op on non-executor processes.
    ///
    /// Per-task start failures (typically an invalid schedule) are logged
    /// individually so one malformed task does not block the others.
    pub fn start_all(&self) {
        if !self.config.is_executor {
            debug!("not the executor process, skipping task start");
            return;
        }

        let tasks: Vec<_> = self.tasks_guard().iter().cloned().collect();
        info!("starting {} scheduled task(s)", tasks.len());
        for task in tasks {
            if let Err(e) = task.start(self.engine.as_ref()) {
                error!(task = %task.name(), error = %e, "failed to start scheduled task");
            }
        }
    }

    /// Stop every task and clear the registry. Used at process shutdown.
    pub fn stop_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks_guard());
        for task in &tasks {
            task.stop();
        }
        debug!("stopped {} scheduled task(s)", tasks.len());
    }

    /// Remove every task registered by `owner`: stop it, drop it from the
    /// registry, and (on the executor) delete its metadata record.
    ///
    /// An empty or `"none"` owner is refused with a warning so unowned and
    /// system tasks can never be mass-removed. Matching zero tasks is a
    /// harmless no-op.
    pub async fn teardown_tasks_by_owner(&self, owner: &str) {
        if owner.is_empty() || owner == UNOWNED {
            warn!("refusing to tear down tasks without an explicit owner");
            return;
        }

        let removed: Vec<_> = {
            let mut tasks = self.tasks_guard();
            let (matching, remaining) =
                std::mem::take(&mut *tasks).into_iter().partition(|t| t.owner() == owner);
            *tasks = remaining;
            matching
        };

        for task in &removed {
            task.stop();
            if self.config.is_executor
                && let Err(e) = self.store.delete(&meta_key(&task.name())).await
            {
                warn!(task = %task.name(), error = %e, "failed to delete task metadata");
            }
        }

        info!(owner = %owner, "removed {} scheduled task(s)", removed.len());
    }

    /// Read-only projection of every registered task.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.tasks_guard().iter().map(|t| t.info()).collect()
    }

    /// Read-only projection of the tasks registered by `owner`.
    #[must_use]
    pub fn tasks_by_owner(&self, owner: &str) -> Vec<TaskInfo> {
        self.tasks_guard()
            .iter()
            .filter(|t| t.owner() == owner)
            .map(|t| t.info())
            .collect()
    }
}

/// Registration handle binding tasks to one plugin/theme owner.
///
/// Borrowing the registry guarantees the scope cannot outlive it; there is
/// no ambient "current owner" state to forget to clear.
pub struct OwnerScope<'a> {
    registry: &'a SchedulerRegistry,
    owner: String,
}

impl OwnerScope<'_> {
    /// Register a task under this scope's owner.
    pub fn call<F, Fut>(&self, callback: F, name: Option<&str>) -> Arc<ScheduledTask>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry
            .register(self.owner.clone(), boxed(callback), name)
    }

    /// The owner this scope registers under.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

fn boxed<F, Fut>(callback: F) -> TaskCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || -> futures_util::future::BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(callback())
    })
}
