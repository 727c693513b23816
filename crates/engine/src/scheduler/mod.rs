//! Periodic job runner binding sources to tokio tasks.
//!
//! Each job is an independent tokio task ticking at its own interval, so a
//! slow backend never delays another source's tick. Jobs added before
//! [`Scheduler::start`] are held until the scheduler starts.

mod job;


use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use propd_core::config::DEFAULT_INTERVAL;
use propd_core::Source;
use tokio::task::JoinHandle;

pub use job::JobInfo;
use job::{JobContext, NextRun};

struct JobEntry {
    name: String,
    source: Arc<dyn Source>,
    interval: Duration,
    max_instances: usize,
    next_run: NextRun,
    handle: Option<JoinHandle<()>>,
}

impl JobEntry {
    fn info(&self, id: &str) -> JobInfo {
        JobInfo {
            id: id.to_string(),
            name: self.name.clone(),
            interval: self.interval,
            max_instances: self.max_instances,
            next_run: *self.next_run.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub struct Scheduler {
    jobs: Mutex<HashMap<String, JobEntry>>,
    default_interval: Duration,
    /// How late a tick may fire and still run.
    grace: Duration,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            default_interval,
            grace: default_interval / 3,
            started: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn spawn(&self, id: &str, entry: &mut JobEntry) {
        *entry.next_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        entry.handle = Some(tokio::spawn(job::run_loop(JobContext {
            id: id.to_string(),
            name: entry.name.clone(),
            source: Arc::clone(&entry.source),
            interval: entry.interval,
            max_instances: entry.max_instances,
            grace: self.grace,
            next_run: Arc::clone(&entry.next_run),
        })));
    }

    /// Start every pending job. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut jobs = self.lock();
        for (id, entry) in jobs.iter_mut() {
            if entry.handle.is_none() {
                self.spawn(id, entry);
            }
        }
        tracing::info!(jobs = jobs.len(), "scheduler started");
    }

    /// Create or replace the job `id` polling `source`. The first run is
    /// immediate once the scheduler is running.
    pub fn add_job(&self, id: &str, source: Arc<dyn Source>, interval: Option<Duration>) -> JobInfo {
        let interval = interval
            .filter(|d| !d.is_zero())
            .unwrap_or(self.default_interval);
        let mut entry = JobEntry {
            name: source.core().display_name(),
            max_instances: source.core().instances(),
            source,
            interval,
            next_run: Arc::new(Mutex::new(Some(Utc::now()))),
            handle: None,
        };

        let mut jobs = self.lock();
        if let Some(mut previous) = jobs.remove(id) {
            previous.cancel();
            tracing::debug!(job_id = %id, "replacing existing job");
        }
        if self.is_running() {
            self.spawn(id, &mut entry);
        }
        let info = entry.info(id);
        jobs.insert(id.to_string(), entry);
        tracing::info!(job_id = %id, name = %info.name, interval_secs = interval.as_secs(), "job added");
        info
    }

    /// Cancel future runs of `id`. A run already in flight completes.
    pub fn remove_job(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(mut entry) => {
                entry.cancel();
                tracing::info!(job_id = %id, name = %entry.name, "job removed");
                true
            }
            None => false,
        }
    }

    pub fn get_job(&self, id: &str) -> Option<JobInfo> {
        self.lock().get(id).map(|entry| entry.info(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.lock().iter().map(|(id, entry)| entry.info(id)).collect()
    }

    /// Cancel every job and stop accepting new runs until restarted.
    pub fn shutdown(&self) {
        self.started.store(false, Ordering::SeqCst);
        let mut jobs = self.lock();
        for entry in jobs.values_mut() {
            entry.cancel();
        }
        jobs.clear();
        tracing::info!("scheduler shut down");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.jobs.get_mut().unwrap_or_else(|e| e.into_inner()).values_mut() {
            entry.cancel();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.lock().len())
            .field("default_interval", &self.default_interval)
            .field("running", &self.is_running())
            .finish()
    }
}
