//! Source lifecycle events and their fan-out bus.
//!
//! Delivery is synchronous and best-effort: every listener registered for an
//! event kind is called in registration order, and a listener that errors or
//! panics is logged without affecting the others. The listener table is
//! snapshotted before delivery, so listeners may subscribe, unsubscribe, or
//! trigger further emissions while an event is being delivered.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;

pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Initialized,
    NoUpdate,
    Error,
    Update,
    Shutdown,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Created,
        EventKind::Initialized,
        EventKind::NoUpdate,
        EventKind::Error,
        EventKind::Update,
        EventKind::Shutdown,
    ];
}

/// Identifies the emitting source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOrigin {
    pub name: String,
    pub source_type: String,
}

#[derive(Debug, Clone)]
pub enum SourceEvent {
    Created { origin: EventOrigin },
    Initialized { origin: EventOrigin },
    NoUpdate { origin: EventOrigin },
    Error { origin: EventOrigin, error: String },
    Update { origin: EventOrigin, data: Value },
    Shutdown { origin: EventOrigin },
}

impl SourceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SourceEvent::Created { .. } => EventKind::Created,
            SourceEvent::Initialized { .. } => EventKind::Initialized,
            SourceEvent::NoUpdate { .. } => EventKind::NoUpdate,
            SourceEvent::Error { .. } => EventKind::Error,
            SourceEvent::Update { .. } => EventKind::Update,
            SourceEvent::Shutdown { .. } => EventKind::Shutdown,
        }
    }

    pub fn origin(&self) -> &EventOrigin {
        match self {
            SourceEvent::Created { origin }
            | SourceEvent::Initialized { origin }
            | SourceEvent::NoUpdate { origin }
            | SourceEvent::Error { origin, .. }
            | SourceEvent::Update { origin, .. }
            | SourceEvent::Shutdown { origin } => origin,
        }
    }
}

/// Receiver of source events.
pub trait EventListener: Send + Sync {
    /// Name used in delivery-failure logs.
    fn name(&self) -> &str;

    fn on_event(&self, event: &SourceEvent) -> ListenerResult;
}

struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&SourceEvent) -> ListenerResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &SourceEvent) -> ListenerResult {
        (self.f)(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type ListenerTable = HashMap<EventKind, Vec<(ListenerId, Arc<dyn EventListener>)>>;

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<ListenerTable>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for one event kind.
    pub fn subscribe(&self, kind: EventKind, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut table = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        table.entry(kind).or_default().push((id, listener));
        tracing::debug!(listener = %id, ?kind, "event listener registered");
        id
    }

    /// Register a closure for one event kind.
    pub fn subscribe_fn<F>(&self, kind: EventKind, name: &str, f: F) -> ListenerId
    where
        F: Fn(&SourceEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscribe(
            kind,
            Arc::new(FnListener {
                name: name.to_string(),
                f,
            }),
        )
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut table = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = false;
        for entries in table.values_mut() {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
        }
        removed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        let table = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        table.get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every listener of its kind. Returns the number of
    /// listeners that handled it without error.
    pub fn emit(&self, event: &SourceEvent) -> usize {
        let snapshot: Vec<Arc<dyn EventListener>> = {
            let table = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            table
                .get(&event.kind())
                .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default()
        };

        let mut delivered = 0;
        for listener in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => tracing::warn!(
                    listener = listener.name(),
                    source = %event.origin().name,
                    kind = ?event.kind(),
                    error = %e,
                    "event listener failed"
                ),
                Err(_) => tracing::error!(
                    listener = listener.name(),
                    source = %event.origin().name,
                    kind = ?event.kind(),
                    "event listener panicked"
                ),
            }
        }
        delivered
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        let counts: HashMap<&EventKind, usize> =
            table.iter().map(|(kind, entries)| (kind, entries.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
