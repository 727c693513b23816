//! Registry of running sources and the merged property view over them.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use indexmap::IndexMap;
use propd_core::config::DEFAULT_INTERVAL;
use propd_core::{fingerprint, tree, Config, EventBus, Options, Source, SourceStatus, StatusReport};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::interpolate::Interpolator;
use crate::scheduler::{JobInfo, Scheduler};

/// Sources started by the process itself; reconciliation never removes them.
pub const BOOTSTRAP_SOURCES: [&str; 2] = ["ec2-metadata", "ec2-tags"];

#[derive(Clone)]
pub struct Registration {
    pub source: Arc<dyn Source>,
    /// Colon-delimited mount path in the merged tree.
    pub namespace: String,
}

#[derive(Default)]
struct Registry {
    sources: IndexMap<String, Registration>,
    indices: IndexMap<String, Registration>,
}

/// `(name, identity)` pair used to match desired against running sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceKey {
    pub name: String,
    pub identity: String,
}

impl SourceKey {
    pub fn new(name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: identity.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDiff {
    pub add: Vec<SourceKey>,
    pub remove: Vec<SourceKey>,
}

impl SourceDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    /// 200 when every source and index is ok, 500 otherwise.
    pub code: u16,
    /// Worst status among unhealthy entries, `OK` when none are.
    pub status: SourceStatus,
    pub sources: Vec<StatusReport>,
    pub indices: Vec<StatusReport>,
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub default_interval: Duration,
    /// Static overlay merged on top of every source.
    pub overlay: Map<String, Value>,
    /// Names exempt from reconciliation removal.
    pub protected: Vec<String>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_INTERVAL,
            overlay: Map::new(),
            protected: BOOTSTRAP_SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            overlay: config.properties.clone(),
            ..Self::default()
        }
    }
}

/// Orchestrator for every source in the process.
///
/// Registry locks are held only for map access; never across a poll, an
/// event delivery, or a scheduler call, so listeners may call back into
/// [`schedule`](Self::schedule) and [`unschedule`](Self::unschedule).
pub struct SourceManager {
    registry: RwLock<Registry>,
    scheduler: Scheduler,
    events: Arc<EventBus>,
    interpolator: Interpolator,
    overlay: Map<String, Value>,
    protected: HashSet<String>,
}

impl SourceManager {
    pub fn new(events: Arc<EventBus>, options: ManagerOptions) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            scheduler: Scheduler::new(options.default_interval),
            events,
            interpolator: Interpolator::new(),
            overlay: options.overlay,
            protected: options.protected.into_iter().collect(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Cancel every job and shut down every registered source.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        let all: Vec<Arc<dyn Source>> = {
            let registry = self.read();
            registry
                .sources
                .values()
                .chain(registry.indices.values())
                .map(|r| Arc::clone(&r.source))
                .collect()
        };
        for source in all {
            source.shutdown();
        }
    }

    // ── Registry ──────────────────────────────────────────────

    /// Insert `source` under its name, replacing any previous registration.
    pub fn register(&self, source: Arc<dyn Source>, namespace: &str, is_index: bool) {
        let name = source.name().to_string();
        let registration = Registration {
            source,
            namespace: namespace.to_string(),
        };
        let mut registry = self.write();
        if is_index {
            registry.sources.shift_remove(&name);
            registry.indices.insert(name, registration);
        } else {
            registry.indices.shift_remove(&name);
            registry.sources.insert(name, registration);
        }
    }

    pub fn unregister(&self, name: &str) -> Option<Registration> {
        let mut registry = self.write();
        registry
            .sources
            .shift_remove(name)
            .or_else(|| registry.indices.shift_remove(name))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.registration(name).map(|r| r.source)
    }

    pub fn registration(&self, name: &str) -> Option<Registration> {
        let registry = self.read();
        registry
            .sources
            .get(name)
            .or_else(|| registry.indices.get(name))
            .cloned()
    }

    pub fn is_index(&self, name: &str) -> bool {
        self.read().indices.contains_key(name)
    }

    /// Bootstrap sources that reconciliation may neither remove nor replace.
    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(name)
    }

    /// Non-index sources in registration order.
    pub fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.read().sources.values().map(|r| Arc::clone(&r.source)).collect()
    }

    pub fn indices(&self) -> Vec<Arc<dyn Source>> {
        self.read().indices.values().map(|r| Arc::clone(&r.source)).collect()
    }

    // ── Scheduling ────────────────────────────────────────────

    pub fn job_id(source: &dyn Source) -> String {
        fingerprint::job_id(&source.core().display_name())
    }

    /// Register `source` and bind it to a job that runs now and then every
    /// `interval` (the default interval when `None`). Rescheduling replaces
    /// the existing job.
    pub fn schedule(
        &self,
        source: Arc<dyn Source>,
        namespace: &str,
        is_index: bool,
        interval: Option<Duration>,
    ) -> JobInfo {
        tracing::debug!(source = %source.name(), namespace, is_index, "scheduling source");
        self.register(Arc::clone(&source), namespace, is_index);
        let id = Self::job_id(source.as_ref());
        self.scheduler.add_job(&id, source, interval)
    }

    /// Unregister `source` and cancel its job. An in-flight poll completes.
    pub fn unschedule(&self, source: &dyn Source) -> bool {
        let registered = {
            let mut registry = self.write();
            let name = source.name();
            let matches = |r: &Registration| r.source.identity() == source.identity();
            if registry.sources.get(name).is_some_and(matches) {
                registry.sources.shift_remove(name).is_some()
            } else if registry.indices.get(name).is_some_and(matches) {
                registry.indices.shift_remove(name).is_some()
            } else {
                false
            }
        };
        // A newer source under the same name shares the job id; leave its job alone.
        if registered {
            self.scheduler.remove_job(&Self::job_id(source));
            tracing::debug!(source = %source.name(), "unscheduled source");
        }
        registered
    }

    pub fn get_job(&self, source: &dyn Source) -> Option<JobInfo> {
        self.scheduler.get_job(&Self::job_id(source))
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|source| self.scheduler.contains(&Self::job_id(source.as_ref())))
    }

    // ── Reconciliation support ────────────────────────────────

    pub fn identity(&self, name: &str, source_type: &str, options: &Options) -> String {
        fingerprint::identity(name, source_type, options)
    }

    /// Compare `desired` against registered, non-bootstrap, non-index sources.
    pub fn source_diff(&self, desired: &[SourceKey]) -> SourceDiff {
        let current: Vec<SourceKey> = {
            let registry = self.read();
            registry
                .sources
                .values()
                .filter(|r| !self.protected.contains(r.source.name()))
                .map(|r| SourceKey::new(r.source.name(), r.source.identity()))
                .collect()
        };
        let current_set: HashSet<&SourceKey> = current.iter().collect();
        let desired_set: HashSet<&SourceKey> = desired.iter().collect();

        let mut seen = HashSet::new();
        let add = desired
            .iter()
            .filter(|key| !current_set.contains(key) && seen.insert(*key))
            .cloned()
            .collect();
        let remove = current
            .iter()
            .filter(|key| !desired_set.contains(key))
            .cloned()
            .collect();
        SourceDiff { add, remove }
    }

    // ── Reads ─────────────────────────────────────────────────

    /// Merged, interpolated property tree.
    ///
    /// Available sources in registration order, then available indices'
    /// static properties, then the configured overlay; later wins.
    pub fn properties(&self) -> Map<String, Value> {
        let (sources, indices): (Vec<Registration>, Vec<Registration>) = {
            let registry = self.read();
            (
                registry.sources.values().cloned().collect(),
                registry.indices.values().cloned().collect(),
            )
        };

        let trees = sources
            .iter()
            .chain(indices.iter())
            .filter(|r| r.source.core().is_available())
            .map(|r| tree::mount(&r.namespace, r.source.core().properties().to_map()))
            .chain(std::iter::once(self.overlay.clone()));

        self.interpolator.resolve_tree(tree::merge_all(trees))
    }

    pub fn health(&self) -> HealthReport {
        let sources: Vec<StatusReport> = self.sources().iter().map(|s| s.status()).collect();
        let indices: Vec<StatusReport> = self.indices().iter().map(|s| s.status()).collect();

        let status = sources
            .iter()
            .chain(indices.iter())
            .filter(|report| !report.ok)
            .map(|report| {
                if report.status.is_failure() {
                    report.status
                } else {
                    SourceStatus::Error
                }
            })
            .max_by_key(|status| status.severity())
            .unwrap_or(SourceStatus::Ok);
        let ok = sources.iter().chain(indices.iter()).all(|report| report.ok);

        HealthReport {
            ok,
            code: if ok { 200 } else { 500 },
            status,
            sources,
            indices,
        }
    }
}

impl std::fmt::Debug for SourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.read();
        f.debug_struct("SourceManager")
            .field("sources", &registry.sources.keys().collect::<Vec<_>>())
            .field("indices", &registry.indices.keys().collect::<Vec<_>>())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
