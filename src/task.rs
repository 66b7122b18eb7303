//! Scheduled task definition and the per-firing execution protocol.
//!
//! A [`ScheduledTask`] is one named callback plus its schedule and overlap
//! policy. Execution is serialized across the cluster per task name via a
//! lock record in the shared store: read, judge staleness, write, run,
//! delete. The read-then-write window is deliberately not atomic; see the
//! concurrency notes on [`ScheduledTask::execute`].

use crate::error::{Result, SchedulerError};
use crate::observer::{JobDescriptor, JobObserver, JobPatch, JobStatus};
use crate::schedule::ScheduleSpec;
use crate::store::KvStore;
use crate::trigger::{TriggerEngine, TriggerHandle};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Owner value for tasks registered outside any plugin/theme scope.
///
/// Unowned tasks are never removed by owner-scoped teardown.
pub const UNOWNED: &str = "none";

/// Boxed async task callback.
pub type TaskCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Store key holding a task's lock record.
pub(crate) fn lock_key(name: &str) -> String {
    format!("scheduler:lock:{name}")
}

/// Store key holding a task's metadata record.
pub(crate) fn meta_key(name: &str) -> String {
    format!("scheduler:task:{name}")
}

/// Current epoch time in milliseconds.
#[must_use]
pub(crate) fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

/// Lock record written to the shared store while a firing runs.
///
/// Carries no expiry field; staleness is judged by the reader as
/// `now - acquired_at_ms > TTL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Epoch milliseconds when the lock was taken.
    pub acquired_at_ms: u64,
    /// Identity of the process that took it.
    pub holder: String,
}

/// Read-only projection of one task for introspection and the admin UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task name.
    pub name: String,
    /// Owning plugin/theme slug, or `"none"`.
    pub owner: String,
    /// Configured schedule, if any.
    pub schedule: Option<ScheduleSpec>,
    /// Whether concurrent firings are permitted.
    pub allow_overlap: bool,
}

/// Lifecycle state of a task, derived for introspection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Registered but not yet started.
    Constructed,
    /// Registered with the trigger engine, waiting for a firing.
    Scheduled,
    /// A firing is currently running.
    Executing,
    /// Stopped; no further firings.
    Stopped,
}

struct TaskState {
    name: String,
    spec: Option<ScheduleSpec>,
    allow_overlap: bool,
    triggers: Vec<Box<dyn TriggerHandle>>,
    ever_started: bool,
}

/// One recurring task: name, owner, schedule, callback, and the locked
/// execution protocol.
///
/// Builder methods take `&self` and return `&Self` so a task handed out by
/// the registry can be configured by chaining:
///
/// ```ignore
/// registry.call(backup, Some("nightly-backup")).daily_at("02:00");
/// ```
pub struct ScheduledTask {
    owner: String,
    callback: TaskCallback,
    store: Arc<dyn KvStore>,
    observer: Option<Arc<dyn JobObserver>>,
    holder_id: String,
    lock_ttl_ms: u64,
    executing: AtomicBool,
    state: Mutex<TaskState>,
}

impl ScheduledTask {
    pub(crate) fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        callback: TaskCallback,
        store: Arc<dyn KvStore>,
        observer: Option<Arc<dyn JobObserver>>,
        holder_id: impl Into<String>,
        lock_ttl_ms: u64,
    ) -> Self {
        Self {
            owner: owner.into(),
            callback,
            store,
            observer,
            holder_id: holder_id.into(),
            lock_ttl_ms,
            executing: AtomicBool::new(false),
            state: Mutex::new(TaskState {
                name: name.into(),
                spec: None,
                allow_overlap: false,
                triggers: Vec::new(),
                ever_started: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> String {
        self.state().name.clone()
    }

    /// Owning plugin/theme slug, or [`UNOWNED`]. Immutable after
    /// construction.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Derived lifecycle state.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        if self.executing.load(Ordering::SeqCst) {
            return TaskStatus::Executing;
        }
        let state = self.state();
        if !state.triggers.is_empty() {
            TaskStatus::Scheduled
        } else if state.ever_started {
            TaskStatus::Stopped
        } else {
            TaskStatus::Constructed
        }
    }

    /// Introspection projection of this task.
    #[must_use]
    pub fn info(&self) -> TaskInfo {
        let state = self.state();
        TaskInfo {
            name: state.name.clone(),
            owner: self.owner.clone(),
            schedule: state.spec.clone(),
            allow_overlap: state.allow_overlap,
        }
    }

    fn set_spec(&self, spec: ScheduleSpec) -> &Self {
        self.state().spec = Some(spec);
        self
    }

    /// Set a raw cron expression. Last setter wins.
    pub fn cron(&self, expr: impl Into<String>) -> &Self {
        self.set_spec(ScheduleSpec::Cron { expr: expr.into() })
    }

    /// Run every minute.
    pub fn every_minute(&self) -> &Self {
        self.set_spec(ScheduleSpec::EveryMinute)
    }

    /// Run every `minutes` minutes.
    pub fn every_minutes(&self, minutes: u32) -> &Self {
        self.set_spec(ScheduleSpec::EveryMinutes { minutes })
    }

    /// Run hourly on the hour.
    pub fn hourly(&self) -> &Self {
        self.set_spec(ScheduleSpec::Hourly)
    }

    /// Run hourly at the given minute.
    pub fn hourly_at(&self, minute: u32) -> &Self {
        self.set_spec(ScheduleSpec::HourlyAt { minute })
    }

    /// Run daily at midnight UTC.
    pub fn daily(&self) -> &Self {
        self.set_spec(ScheduleSpec::Daily)
    }

    /// Run daily at `"HH:MM"` UTC. Malformed times are rejected by the
    /// trigger engine at [`start`](Self::start).
    pub fn daily_at(&self, time: impl Into<String>) -> &Self {
        self.set_spec(ScheduleSpec::DailyAt { time: time.into() })
    }

    /// Run weekly on Sunday at midnight UTC.
    pub fn weekly(&self) -> &Self {
        self.set_spec(ScheduleSpec::Weekly)
    }

    /// Run monthly on the 1st at midnight UTC.
    pub fn monthly(&self) -> &Self {
        self.set_spec(ScheduleSpec::Monthly)
    }

    /// Permit concurrent firings of this task (skip the lock check).
    pub fn allow_overlapping(&self) -> &Self {
        self.state().allow_overlap = true;
        self
    }

    /// Override the task's name. Keeping names unique across the process
    /// stays the caller's responsibility.
    pub fn named(&self, name: impl Into<String>) -> &Self {
        self.state().name = name.into();
        self
    }

    /// Register this task with the trigger engine so each firing runs
    /// [`execute`](Self::execute).
    ///
    /// Fails when no schedule has been configured. Not idempotent: calling
    /// twice registers two independent triggers, preserved from the source
    /// behavior.
    pub fn start(self: &Arc<Self>, engine: &dyn TriggerEngine) -> Result<()> {
        let (name, spec) = {
            let state = self.state();
            (state.name.clone(), state.spec.clone())
        };
        let spec = spec.ok_or_else(|| {
            SchedulerError::Config(format!("task '{name}' has no schedule configured"))
        })?;

        let task = Arc::clone(self);
        let handle = engine.register(
            &spec,
            Box::new(move || {
                let task = Arc::clone(&task);
                tokio::spawn(async move {
                    task.execute().await;
                });
            }),
        )?;

        let mut state = self.state();
        state.triggers.push(handle);
        state.ever_started = true;
        debug!(task = %name, schedule = %spec, "task started");
        Ok(())
    }

    /// Deregister from the trigger engine. Safe on a never-started task.
    ///
    /// Only future firings are prevented; an in-flight
    /// [`execute`](Self::execute) runs to completion.
    pub fn stop(&self) {
        let mut state = self.state();
        for trigger in state.triggers.drain(..) {
            trigger.stop();
        }
    }

    /// Run one firing to completion.
    ///
    /// Protocol: read the lock record; with overlap disallowed, a record
    /// fresher than the TTL drops the firing (never queued or retried).
    /// Otherwise upsert the lock, report to the observer, await the
    /// callback, and always delete the lock afterwards. Callback errors
    /// are logged and reported, never propagated, so one task's failure
    /// cannot affect the registry or other tasks.
    ///
    /// The read-then-write lock acquisition is not compare-and-swap: two
    /// processes racing inside that window can both run the task, and a
    /// callback outliving the TTL can have its lock treated as abandoned
    /// by a peer. Both are preserved source behaviors.
    pub async fn execute(&self) {
        let (name, allow_overlap) = {
            let state = self.state();
            (state.name.clone(), state.allow_overlap)
        };
        let key = lock_key(&name);
        let now = now_epoch_millis();

        match self.store.get(&key).await {
            Ok(Some(value)) => {
                if !allow_overlap {
                    match serde_json::from_value::<LockRecord>(value) {
                        Ok(record)
                            if now.saturating_sub(record.acquired_at_ms) < self.lock_ttl_ms =>
                        {
                            debug!(task = %name, holder = %record.holder,
                                "task already running, skipping this firing");
                            return;
                        }
                        Ok(record) => {
                            debug!(task = %name, holder = %record.holder,
                                "overwriting stale lock from crashed holder");
                        }
                        Err(e) => {
                            warn!(task = %name, error = %e,
                                "ignoring malformed lock record");
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                // A lock we already tolerate losing via the TTL is not
                // worth wedging the scheduler over; run anyway.
                warn!(task = %name, error = %e, "failed to read lock record, proceeding");
            }
        }

        let record = LockRecord {
            acquired_at_ms: now,
            holder: self.holder_id.clone(),
        };
        match serde_json::to_value(&record) {
            Ok(value) => {
                if let Err(e) = self.store.set(&key, value).await {
                    warn!(task = %name, error = %e, "failed to write lock record, proceeding");
                }
            }
            Err(e) => warn!(task = %name, error = %e, "failed to encode lock record"),
        }

        let job_id = format!("scheduled_{name}_{now}");
        if let Some(observer) = &self.observer {
            let descriptor = JobDescriptor {
                id: job_id.clone(),
                title: format!("Scheduled: {name}"),
                status: JobStatus::Processing,
            };
            if let Err(e) = observer.create(descriptor).await {
                warn!(task = %name, error = %e, "failed to create job entry");
            }
        }

        self.executing.store(true, Ordering::SeqCst);
        let outcome = (self.callback)().await;
        self.executing.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                if let Some(observer) = &self.observer
                    && let Err(e) = observer.update(&job_id, JobPatch::completed()).await
                {
                    warn!(task = %name, error = %e, "failed to mark job completed");
                }
            }
            Err(e) => {
                error!(task = %name, error = %e, "scheduled task failed");
                if let Some(observer) = &self.observer
                    && let Err(err) = observer.update(&job_id, JobPatch::failed(e.to_string())).await
                {
                    warn!(task = %name, error = %err, "failed to mark job failed");
                }
            }
        }

        if let Err(e) = self.store.delete(&key).await {
            warn!(task = %name, error = %e, "failed to release task lock");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::DEFAULT_LOCK_TTL_MS;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct RecordedJob {
        id: String,
        status: JobStatus,
        error: Option<String>,
        progress: Option<u8>,
    }

    #[derive(Default)]
    struct RecordingObserver {
        jobs: Mutex<Vec<RecordedJob>>,
    }

    #[async_trait::async_trait]
    impl JobObserver for RecordingObserver {
        async fn create(&self, job: JobDescriptor) -> Result<()> {
            self.jobs
                .lock()
                .expect("observer lock")
                .push(RecordedJob {
                    id: job.id,
                    status: job.status,
                    error: None,
                    progress: None,
                });
            Ok(())
        }

        async fn update(&self, job_id: &str, patch: JobPatch) -> Result<()> {
            let mut jobs = self.jobs.lock().expect("observer lock");
            let job = jobs
                .iter_mut()
                .find(|j| j.id == job_id)
                .expect("job exists");
            if let Some(status) = patch.status {
                job.status = status;
            }
            if let Some(progress) = patch.progress {
                job.progress = Some(progress);
            }
            if let Some(error) = patch.error {
                job.error = Some(error);
            }
            Ok(())
        }
    }

    fn counting_callback(calls: Arc<AtomicUsize>) -> TaskCallback {
        Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn make_task(
        store: Arc<MemoryStore>,
        observer: Option<Arc<RecordingObserver>>,
        callback: TaskCallback,
    ) -> ScheduledTask {
        ScheduledTask::new(
            UNOWNED,
            "test-task",
            callback,
            store,
            observer.map(|o| -> Arc<dyn JobObserver> { o }),
            "pid:test",
            DEFAULT_LOCK_TTL_MS,
        )
    }

    #[tokio::test]
    async fn execute_runs_callback_and_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(Arc::clone(&store), None, counting_callback(Arc::clone(&calls)));

        task.execute().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(
            store.get(&lock_key("test-task")).await.unwrap().is_none(),
            "lock must be released after execution"
        );
    }

    #[tokio::test]
    async fn fresh_lock_drops_the_firing() {
        let store = Arc::new(MemoryStore::new());
        let record = LockRecord {
            acquired_at_ms: now_epoch_millis(),
            holder: "pid:other".to_owned(),
        };
        store
            .set(
                &lock_key("test-task"),
                serde_json::to_value(&record).unwrap(),
            )
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(Arc::clone(&store), None, counting_callback(Arc::clone(&calls)));

        task.execute().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0, "firing must be dropped");
        let held = store.get(&lock_key("test-task")).await.unwrap();
        assert!(held.is_some(), "the other holder's lock stays in place");
    }

    #[tokio::test]
    async fn stale_lock_is_overwritten_and_task_runs() {
        let store = Arc::new(MemoryStore::new());
        let record = LockRecord {
            acquired_at_ms: now_epoch_millis().saturating_sub(2 * DEFAULT_LOCK_TTL_MS),
            holder: "pid:crashed".to_owned(),
        };
        store
            .set(
                &lock_key("test-task"),
                serde_json::to_value(&record).unwrap(),
            )
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(Arc::clone(&store), None, counting_callback(Arc::clone(&calls)));

        task.execute().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.get(&lock_key("test-task")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn allow_overlapping_ignores_fresh_lock() {
        let store = Arc::new(MemoryStore::new());
        let record = LockRecord {
            acquired_at_ms: now_epoch_millis(),
            holder: "pid:other".to_owned(),
        };
        store
            .set(
                &lock_key("test-task"),
                serde_json::to_value(&record).unwrap(),
            )
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(Arc::clone(&store), None, counting_callback(Arc::clone(&calls)));
        task.allow_overlapping();

        task.execute().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_lock_record_does_not_block_execution() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(&lock_key("test-task"), json!("not a lock record"))
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(Arc::clone(&store), None, counting_callback(Arc::clone(&calls)));

        task.execute().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_callback_is_reported_and_lock_released() {
        let store = Arc::new(MemoryStore::new());
        let observer = Arc::new(RecordingObserver::default());
        let callback: TaskCallback = Arc::new(|| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(async { Err(anyhow::anyhow!("boom")) })
        });
        let task = make_task(Arc::clone(&store), Some(Arc::clone(&observer)), callback);

        task.execute().await;

        let jobs = observer.jobs.lock().expect("observer lock");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error.as_deref(), Some("boom"));
        drop(jobs);

        assert!(
            store.get(&lock_key("test-task")).await.unwrap().is_none(),
            "lock must be released even after a failure"
        );
    }

    #[tokio::test]
    async fn successful_callback_marks_job_completed() {
        let store = Arc::new(MemoryStore::new());
        let observer = Arc::new(RecordingObserver::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(
            Arc::clone(&store),
            Some(Arc::clone(&observer)),
            counting_callback(calls),
        );

        task.execute().await;

        let jobs = observer.jobs.lock().expect("observer lock");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].progress, Some(100));
        assert!(jobs[0].id.starts_with("scheduled_test-task_"));
    }

    #[tokio::test]
    async fn start_without_schedule_is_a_config_error() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(make_task(store, None, counting_callback(calls)));
        let engine = crate::trigger::CronEngine::new();

        let result = task.start(&engine);
        match result {
            Err(SchedulerError::Config(msg)) => {
                assert!(msg.contains("test-task"), "error must name the task: {msg}");
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_on_never_started_task_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(store, None, counting_callback(calls));
        task.stop();
        assert_eq!(task.status(), TaskStatus::Constructed);
    }

    #[tokio::test]
    async fn builder_last_setter_wins() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(store, None, counting_callback(calls));

        task.every_minute().hourly().daily_at("02:00");

        let info = task.info();
        assert_eq!(
            info.schedule,
            Some(ScheduleSpec::DailyAt {
                time: "02:00".to_owned()
            })
        );
        assert!(!info.allow_overlap);
    }

    #[tokio::test]
    async fn named_overrides_the_task_name() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let task = make_task(store, None, counting_callback(calls));

        task.named("renamed").every_minute();

        assert_eq!(task.name(), "renamed");
        assert_eq!(task.owner(), UNOWNED);
    }
}
