use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use propd_core::Source;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};

/// Snapshot of a scheduled job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    /// Display string of the bound source (`type.name`).
    pub name: String,
    pub interval: Duration,
    pub max_instances: usize,
    pub next_run: Option<DateTime<Utc>>,
}

pub(super) type NextRun = Arc<Mutex<Option<DateTime<Utc>>>>;

/// Everything one job loop needs.
pub(super) struct JobContext {
    pub id: String,
    pub name: String,
    pub source: Arc<dyn Source>,
    pub interval: Duration,
    pub max_instances: usize,
    pub grace: Duration,
    pub next_run: NextRun,
}

fn set_next_run(next_run: &NextRun, at: DateTime<Utc>) {
    *next_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
}

/// Tick forever, spawning one poll per tick.
///
/// The first tick fires immediately. Ticks missed while the runtime was busy
/// collapse into one; a tick later than `grace` is dropped. A tick that finds
/// `max_instances` polls still in flight is skipped rather than queued.
pub(super) async fn run_loop(ctx: JobContext) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let limit = Arc::new(Semaphore::new(ctx.max_instances));
    let step = chrono::Duration::from_std(ctx.interval).unwrap_or_else(|_| chrono::Duration::zero());

    loop {
        let scheduled = ticker.tick().await;
        set_next_run(&ctx.next_run, Utc::now() + step);

        let late = Instant::now().saturating_duration_since(scheduled);
        if late > ctx.grace {
            tracing::warn!(
                job_id = %ctx.id,
                name = %ctx.name,
                late_ms = late.as_millis() as u64,
                "run time missed by more than the grace period, skipping"
            );
            continue;
        }

        let permit = match Arc::clone(&limit).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    job_id = %ctx.id,
                    name = %ctx.name,
                    max_instances = ctx.max_instances,
                    "maximum number of running instances reached, skipping"
                );
                continue;
            }
        };

        let source = Arc::clone(&ctx.source);
        let id = ctx.id.clone();
        let name = ctx.name.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match AssertUnwindSafe(source.get()).catch_unwind().await {
                Ok(()) => tracing::info!(job_id = %id, name = %name, "job executed successfully"),
                Err(_) => tracing::error!(job_id = %id, name = %name, "job panicked"),
            }
        });
    }
}
