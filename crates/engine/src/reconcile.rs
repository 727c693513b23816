//! Keeps the running source set in line with the remote index document.
//!
//! The reconciler listens for `UPDATE` events. When the emitter is
//! registered as an index, the event payload is the full index document;
//! its source list is interpolated against the current merged tree, diffed
//! against the registry, and applied. Index sources emit `NO_UPDATE` when
//! their document is unchanged, so an unchanged document causes no work.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use propd_core::events::ListenerResult;
use propd_core::{EventBus, EventKind, EventListener, ListenerId, Options, SourceContext, SourceEvent, SourceFactory};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::interpolate::Interpolator;
use crate::manager::{SourceKey, SourceManager};

/// Remote index document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(default)]
    pub version: Option<u64>,
    /// Static property overlay contributed by the index itself.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Raw source entries; each is validated on its own so one bad entry
    /// cannot block the rest.
    #[serde(default)]
    pub sources: Vec<Value>,
}

impl IndexDocument {
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(EngineError::InvalidDocument("expected a JSON object".into()));
        }
        Ok(serde_json::from_value(value.clone())?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub parameters: Options,
    /// Mount path for the source's output; the tree root when empty.
    #[serde(default)]
    pub namespace: String,
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct Reconciler {
    manager: Weak<SourceManager>,
    factory: Arc<SourceFactory>,
    ctx: SourceContext,
    interval: Option<Duration>,
    interpolator: Interpolator,
}

impl Reconciler {
    /// `interval` is the poll interval for sources the index adds; `None`
    /// uses the scheduler default.
    pub fn new(
        manager: &Arc<SourceManager>,
        factory: Arc<SourceFactory>,
        ctx: SourceContext,
        interval: Option<Duration>,
    ) -> Self {
        Self {
            manager: Arc::downgrade(manager),
            factory,
            ctx,
            interval,
            interpolator: Interpolator::new(),
        }
    }

    /// Register for `UPDATE` events on `bus`.
    pub fn subscribe(self, bus: &EventBus) -> ListenerId {
        bus.subscribe(EventKind::Update, Arc::new(self))
    }

    /// Apply the index document published by the index source `index_name`.
    pub fn reconcile(&self, index_name: &str, document: &IndexDocument) -> Result<ReconcileOutcome> {
        let Some(manager) = self.manager.upgrade() else {
            return Ok(ReconcileOutcome::default());
        };

        let mut outcome = ReconcileOutcome::default();
        let definitions = self.resolve_definitions(&manager, index_name, document, &mut outcome.skipped);
        let desired: Vec<SourceKey> = definitions
            .iter()
            .map(|def| {
                SourceKey::new(
                    &def.name,
                    manager.identity(&def.name, &def.source_type, &def.parameters),
                )
            })
            .collect();
        let diff = manager.source_diff(&desired);

        // Removals first: a definition whose options changed keeps its name,
        // and the replacement must not be unscheduled with the old one.
        for key in &diff.remove {
            if let Some(source) = manager.get(&key.name) {
                if source.identity() == key.identity && manager.unschedule(source.as_ref()) {
                    outcome.removed.push(key.name.clone());
                }
            }
        }

        for key in &diff.add {
            let Some(def) = desired
                .iter()
                .position(|d| d == key)
                .map(|i| &definitions[i])
            else {
                continue;
            };
            match self
                .factory
                .create(&def.source_type, &def.name, &def.parameters, &self.ctx)
            {
                Ok(source) => {
                    manager.schedule(source, &def.namespace, false, self.interval);
                    outcome.added.push(def.name.clone());
                }
                Err(e) => {
                    tracing::error!(
                        source = %def.name,
                        source_type = %def.source_type,
                        error = %e,
                        "unable to create source from index"
                    );
                    outcome.skipped.push(def.name.clone());
                }
            }
        }

        if !outcome.added.is_empty() {
            tracing::info!(index = index_name, count = outcome.added.len(), "added sources from the index");
        }
        if !outcome.removed.is_empty() {
            tracing::info!(index = index_name, count = outcome.removed.len(), "removed sources from the index");
        }
        Ok(outcome)
    }

    /// Interpolate the source list against the current tree, then validate
    /// each entry on its own. Entries that do not parse, reuse the name of a
    /// bootstrap or index source, or repeat an earlier name are logged and
    /// pushed to `skipped`. `s3` entries without a bucket inherit the index's.
    fn resolve_definitions(
        &self,
        manager: &SourceManager,
        index_name: &str,
        document: &IndexDocument,
        skipped: &mut Vec<String>,
    ) -> Vec<SourceDefinition> {
        let context = manager.properties();
        let index_bucket = manager
            .get(index_name)
            .and_then(|index| index.core().options().get("bucket").cloned());

        let mut seen = HashSet::new();
        let mut definitions = Vec::with_capacity(document.sources.len());
        for (position, raw) in document.sources.iter().enumerate() {
            let label = raw
                .get("name")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("#{position}"));
            let resolved = self.interpolator.resolve_value(raw.clone(), &context);
            let mut def = match serde_json::from_value::<SourceDefinition>(resolved) {
                Ok(def) => def,
                Err(e) => {
                    tracing::error!(index = index_name, source = %label, error = %e, "invalid source definition in index");
                    skipped.push(label);
                    continue;
                }
            };

            if manager.is_protected(&def.name) || manager.is_index(&def.name) {
                tracing::warn!(index = index_name, source = %def.name, "index entry reuses a reserved source name, skipping");
                skipped.push(def.name);
                continue;
            }
            if !seen.insert(def.name.clone()) {
                tracing::warn!(index = index_name, source = %def.name, "duplicate source name in index, keeping the first entry");
                skipped.push(def.name);
                continue;
            }

            if def.source_type == "s3" {
                if let Some(bucket) = &index_bucket {
                    def.parameters
                        .entry("bucket")
                        .or_insert_with(|| bucket.clone());
                }
            }
            definitions.push(def);
        }
        definitions
    }
}

impl EventListener for Reconciler {
    fn name(&self) -> &str {
        "index-reconciler"
    }

    fn on_event(&self, event: &SourceEvent) -> ListenerResult {
        let SourceEvent::Update { origin, data } = event else {
            return Ok(());
        };
        let is_index = self
            .manager
            .upgrade()
            .is_some_and(|manager| manager.is_index(&origin.name));
        if !is_index {
            return Ok(());
        }

        let document = IndexDocument::from_value(data)?;
        self.reconcile(&origin.name, &document)?;
        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("factory", &self.factory)
            .field("interval", &self.interval)
            .finish()
    }
}
