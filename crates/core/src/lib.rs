pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod fingerprint;
pub mod properties;
pub mod source;
pub mod tree;
pub mod types;

pub use config::Config;
pub use error::*;
pub use events::{EventBus, EventKind, EventListener, EventOrigin, ListenerId, SourceEvent};
pub use factory::{SourceFactory, SourcePlugin};
pub use properties::PropertyStore;
pub use source::{Options, Source, SourceContext, SourceCore};
pub use types::{SourceState, SourceStatus, StatusReport};

pub use async_trait::async_trait;
pub use inventory;
