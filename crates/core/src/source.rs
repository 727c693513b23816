//! The source contract and its lifecycle.
//!
//! Every backend adapter embeds a [`SourceCore`] that owns the common state
//! (lifecycle, status, signature, last good properties) and implements
//! [`Source::poll_once`] for the backend-specific fetch. The scheduler drives
//! [`Source::get`], which brackets one fetch with the lifecycle transitions:
//!
//! ```text
//! CREATED -> INITIALIZING -> WAITING <-> RUNNING
//!     \___________\______________\_________\___> SHUTDOWN
//! ```

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::SourceError;
use crate::events::{EventBus, EventOrigin, SourceEvent};
use crate::fingerprint;
use crate::properties::PropertyStore;
use crate::types::{SourceState, SourceStatus, StatusReport};

/// Options map handed to source constructors.
pub type Options = Map<String, Value>;

/// Shared collaborators passed to every source constructor.
#[derive(Debug, Clone, Default)]
pub struct SourceContext {
    pub events: Arc<EventBus>,
    pub config: Arc<Config>,
}

impl SourceContext {
    pub fn new(events: Arc<EventBus>, config: Arc<Config>) -> Self {
        Self { events, config }
    }
}

#[derive(Debug)]
struct Inner {
    state: SourceState,
    status: SourceStatus,
    signature: Option<String>,
    properties: PropertyStore,
    updated_at: Option<DateTime<Utc>>,
}

/// State common to all sources.
pub struct SourceCore {
    name: String,
    source_type: String,
    options: Options,
    identity: String,
    instances: usize,
    events: Arc<EventBus>,
    inner: RwLock<Inner>,
}

impl SourceCore {
    /// Create the core in `CREATED` and emit `CREATED`.
    pub fn new(name: &str, source_type: &str, options: Options, ctx: &SourceContext) -> Self {
        let core = Self {
            name: name.to_string(),
            source_type: source_type.to_string(),
            identity: fingerprint::identity(name, source_type, &options),
            options,
            instances: 1,
            events: Arc::clone(&ctx.events),
            inner: RwLock::new(Inner {
                state: SourceState::Created,
                status: SourceStatus::Ok,
                signature: None,
                properties: PropertyStore::new(),
                updated_at: None,
            }),
        };
        core.emit(|origin| SourceEvent::Created { origin });
        core
    }

    /// Allow up to `instances` overlapping executions of this source's job.
    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances.max(1);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Fingerprint of `(name, type, options)`.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn instances(&self) -> usize {
        self.instances
    }

    /// `type.name`, the string scheduler job ids are derived from.
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.source_type, self.name)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn state(&self) -> SourceState {
        self.read().state
    }

    pub fn status(&self) -> SourceStatus {
        self.read().status
    }

    pub fn set_status(&self, status: SourceStatus) {
        self.write().status = status;
    }

    pub fn signature(&self) -> Option<String> {
        self.read().signature.clone()
    }

    /// Last successfully parsed output.
    pub fn properties(&self) -> PropertyStore {
        self.read().properties.clone()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.read().updated_at
    }

    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    /// Healthy unless the last poll failed or the source was shut down.
    pub fn is_ok(&self) -> bool {
        let inner = self.read();
        !inner.status.is_failure() && inner.state != SourceState::Shutdown
    }

    pub fn status_report(&self) -> StatusReport {
        let inner = self.read();
        StatusReport {
            name: self.name.clone(),
            source_type: self.source_type.clone(),
            ok: !inner.status.is_failure() && inner.state != SourceState::Shutdown,
            state: inner.state,
            status: inner.status,
            updated_at: inner.updated_at,
        }
    }

    fn origin(&self) -> EventOrigin {
        EventOrigin {
            name: self.name.clone(),
            source_type: self.source_type.clone(),
        }
    }

    fn emit(&self, build: impl FnOnce(EventOrigin) -> SourceEvent) {
        self.events.emit(&build(self.origin()));
    }

    /// Transition taken before a fetch runs.
    pub fn begin_cycle(&self) {
        let mut inner = self.write();
        inner.state = match inner.state {
            SourceState::Created => SourceState::Initializing,
            SourceState::Waiting => SourceState::Running,
            other => other,
        };
    }

    /// Transition taken after a successful fetch.
    pub fn finish_cycle(&self) {
        let initialized = {
            let mut inner = self.write();
            inner.updated_at = Some(Utc::now());
            match inner.state {
                SourceState::Initializing => {
                    inner.state = SourceState::Waiting;
                    true
                }
                SourceState::Running => {
                    inner.state = SourceState::Waiting;
                    false
                }
                _ => false,
            }
        };
        if initialized {
            self.emit(|origin| SourceEvent::Initialized { origin });
        }
    }

    /// Record a failed fetch: status `ERROR`, `ERROR` emitted. A running
    /// source drops back to waiting so its last good output keeps serving;
    /// an initializing one stays unavailable until a fetch succeeds.
    pub fn fail_cycle(&self, error: &SourceError) {
        {
            let mut inner = self.write();
            inner.status = SourceStatus::Error;
            inner.updated_at = Some(Utc::now());
            if inner.state == SourceState::Running {
                inner.state = SourceState::Waiting;
            }
        }
        self.emit(|origin| SourceEvent::Error {
            origin,
            error: error.to_string(),
        });
    }

    /// Permanently disable the source.
    pub fn shutdown(&self) {
        self.write().state = SourceState::Shutdown;
        self.emit(|origin| SourceEvent::Shutdown { origin });
    }

    /// Apply a freshly parsed payload with change detection.
    ///
    /// When `signature` equals the stored one the status becomes `NO_UPDATE`,
    /// `NO_UPDATE` is emitted and nothing else changes; returns `false`.
    /// Otherwise signature and properties are replaced wholesale, status
    /// becomes `OK`, `UPDATE` is emitted with `data`, and `true` is returned.
    pub fn accept(&self, signature: String, properties: PropertyStore, data: Value) -> bool {
        let changed = {
            let mut inner = self.write();
            if inner.signature.as_deref() == Some(signature.as_str()) {
                inner.status = SourceStatus::NoUpdate;
                false
            } else {
                inner.signature = Some(signature);
                inner.properties = properties;
                inner.status = SourceStatus::Ok;
                true
            }
        };
        if changed {
            self.emit(|origin| SourceEvent::Update { origin, data });
        } else {
            tracing::debug!(source = %self.name, "no change since last poll");
            self.emit(|origin| SourceEvent::NoUpdate { origin });
        }
        changed
    }

    /// [`accept`](Self::accept) with a signature computed over the content.
    pub fn accept_content(&self, properties: Map<String, Value>) -> bool {
        let data = Value::Object(properties);
        let signature = fingerprint::content_signature(&data);
        let store = match &data {
            Value::Object(map) => PropertyStore::from(map.clone()),
            _ => PropertyStore::new(),
        };
        self.accept(signature, store, data)
    }

    /// Record "content unchanged" without a payload (e.g. HTTP 304).
    pub fn mark_unchanged(&self) {
        self.set_status(SourceStatus::NoUpdate);
        self.emit(|origin| SourceEvent::NoUpdate { origin });
    }
}

impl fmt::Debug for SourceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("SourceCore")
            .field("name", &self.name)
            .field("type", &self.source_type)
            .field("state", &inner.state)
            .field("status", &inner.status)
            .finish()
    }
}

/// One polling unit.
#[async_trait]
pub trait Source: Send + Sync {
    fn core(&self) -> &SourceCore;

    /// One backend fetch + parse + status classification + event emission.
    ///
    /// Implementations decide between `OK`, `NO_UPDATE`, `NO_EXIST` and
    /// `WARNING` themselves; returning `Err` marks the cycle as `ERROR`.
    async fn poll_once(&self) -> Result<(), SourceError>;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn source_type(&self) -> &str {
        self.core().source_type()
    }

    fn identity(&self) -> &str {
        self.core().identity()
    }

    fn status(&self) -> StatusReport {
        self.core().status_report()
    }

    fn shutdown(&self) {
        self.core().shutdown()
    }

    /// Scheduler entry point. A shut-down source logs and performs no fetch.
    async fn get(&self) {
        let core = self.core();
        if core.state() == SourceState::Shutdown {
            tracing::debug!(source = %core.name(), "source is shut down, skipping poll");
            return;
        }

        let started = std::time::Instant::now();
        core.begin_cycle();
        match self.poll_once().await {
            Ok(()) => core.finish_cycle(),
            Err(e) => {
                tracing::error!(source = %core.name(), error = %e, "poll failed");
                core.fail_cycle(&e);
            }
        }
        tracing::debug!(
            source = %core.name(),
            status = %core.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "poll complete"
        );
    }
}
