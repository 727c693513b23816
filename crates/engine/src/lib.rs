pub mod error;
pub mod interpolate;
pub mod manager;
pub mod reconcile;
pub mod scheduler;

pub use error::{EngineError, Result};
pub use interpolate::Interpolator;
pub use manager::{HealthReport, ManagerOptions, Registration, SourceDiff, SourceKey, SourceManager, BOOTSTRAP_SOURCES};
pub use reconcile::{IndexDocument, ReconcileOutcome, Reconciler, SourceDefinition};
pub use scheduler::{JobInfo, Scheduler};
