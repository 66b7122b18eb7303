//! Trigger engine: fires task callbacks at scheduled instants.
//!
//! The engine is a collaborator behind a trait so hosts can plug in their
//! own firing source; [`CronEngine`] is the built-in implementation, a
//! tokio loop per registration driven by the `cron` crate.

use crate::error::{Result, SchedulerError};
use crate::schedule::ScheduleSpec;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Callback invoked at each firing instant.
pub type FireFn = Box<dyn Fn() + Send + Sync>;

/// Registers schedules and fires callbacks at matching instants.
pub trait TriggerEngine: Send + Sync {
    /// Register `on_fire` to run at each instant matching `spec`.
    ///
    /// Returns a handle that stops future firings when dropped via
    /// [`TriggerHandle::stop`]. Fails when the engine cannot parse the
    /// rendered schedule expression.
    fn register(&self, spec: &ScheduleSpec, on_fire: FireFn) -> Result<Box<dyn TriggerHandle>>;
}

/// Handle to one registered trigger.
pub trait TriggerHandle: Send + Sync {
    /// Stop future firings. In-flight callback work is not cancelled.
    fn stop(&self);
}

/// Cron-driven trigger engine.
///
/// Each registration spawns a tokio task that sleeps until the schedule's
/// next UTC instant and invokes the callback. Requires a running tokio
/// runtime.
#[derive(Debug, Default)]
pub struct CronEngine;

impl CronEngine {
    /// Create a new engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TriggerEngine for CronEngine {
    fn register(&self, spec: &ScheduleSpec, on_fire: FireFn) -> Result<Box<dyn TriggerHandle>> {
        let expr = spec.cron_expr();
        let schedule = cron::Schedule::from_str(&expr).map_err(|e| {
            SchedulerError::Trigger(format!("invalid schedule expression '{expr}': {e}"))
        })?;

        let valid = Arc::new(AtomicBool::new(true));
        let loop_valid = Arc::clone(&valid);
        let join = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    debug!("schedule has no upcoming instants, trigger loop ending");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                if !loop_valid.load(Ordering::SeqCst) {
                    break;
                }
                on_fire();
            }
        });

        Ok(Box::new(CronTriggerHandle { valid, join }))
    }
}

struct CronTriggerHandle {
    valid: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

impl TriggerHandle for CronTriggerHandle {
    fn stop(&self) {
        self.valid.store(false, Ordering::SeqCst);
        self.join.abort();
    }
}
