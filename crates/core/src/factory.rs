//! Mapping from source type names to constructors.
//!
//! Adapters register themselves at link time with [`inventory::submit!`]:
//!
//! ```ignore
//! inventory::submit! {
//!     SourcePlugin { source_type: "s3", create: S3Source::create }
//! }
//! ```
//!
//! [`SourceFactory::from_plugins`] collects every submitted plugin; tests can
//! build an empty factory and [`register`](SourceFactory::register) closures.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::SourceError;
use crate::source::{Options, Source, SourceContext};

/// Constructor signature shared by every adapter.
pub type CreateFn = fn(&str, &Options, &SourceContext) -> Result<Arc<dyn Source>, SourceError>;

type Constructor =
    Arc<dyn Fn(&str, &Options, &SourceContext) -> Result<Arc<dyn Source>, SourceError> + Send + Sync>;

/// Link-time registration of a source type.
pub struct SourcePlugin {
    pub source_type: &'static str,
    pub create: CreateFn,
}

inventory::collect!(SourcePlugin);

#[derive(Default)]
pub struct SourceFactory {
    constructors: RwLock<HashMap<String, Constructor>>,
}

impl SourceFactory {
    /// Empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory holding every plugin submitted via `inventory`.
    pub fn from_plugins() -> Self {
        let factory = Self::new();
        for plugin in inventory::iter::<SourcePlugin> {
            factory.register(plugin.source_type, plugin.create);
        }
        factory
    }

    /// Register (or replace) the constructor for `source_type`.
    pub fn register<F>(&self, source_type: &str, create: F)
    where
        F: Fn(&str, &Options, &SourceContext) -> Result<Arc<dyn Source>, SourceError>
            + Send
            + Sync
            + 'static,
    {
        let mut constructors = self.constructors.write().unwrap_or_else(|e| e.into_inner());
        if constructors
            .insert(source_type.to_string(), Arc::new(create))
            .is_some()
        {
            tracing::debug!(source_type, "replaced source constructor");
        }
    }

    pub fn contains(&self, source_type: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(source_type)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<String> {
        let constructors = self.constructors.read().unwrap_or_else(|e| e.into_inner());
        let mut types: Vec<String> = constructors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Construct a source of `source_type`. Unknown types log a warning and
    /// return [`SourceError::UnknownType`].
    pub fn create(
        &self,
        source_type: &str,
        name: &str,
        options: &Options,
        ctx: &SourceContext,
    ) -> Result<Arc<dyn Source>, SourceError> {
        let constructor = {
            let constructors = self.constructors.read().unwrap_or_else(|e| e.into_inner());
            constructors.get(source_type).cloned()
        };
        match constructor {
            Some(create) => create(name, options, ctx),
            None => {
                tracing::warn!(source_type, name, "unknown source type");
                Err(SourceError::UnknownType(source_type.to_string()))
            }
        }
    }
}

impl fmt::Debug for SourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFactory")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceCore;
    use async_trait::async_trait;

    struct Noop {
        core: SourceCore,
    }

    #[async_trait]
    impl Source for Noop {
        fn core(&self) -> &SourceCore {
            &self.core
        }

        async fn poll_once(&self) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn noop(name: &str, options: &Options, ctx: &SourceContext) -> Result<Arc<dyn Source>, SourceError> {
        Ok(Arc::new(Noop {
            core: SourceCore::new(name, "noop", options.clone(), ctx),
        }))
    }

    #[test]
    fn creates_registered_type() {
        let factory = SourceFactory::new();
        factory.register("noop", noop);
        let ctx = SourceContext::default();

        let source = factory.create("noop", "first", &Options::new(), &ctx).unwrap();
        assert_eq!(source.name(), "first");
        assert_eq!(source.source_type(), "noop");
        assert!(factory.contains("noop"));
        assert_eq!(factory.types(), vec!["noop".to_string()]);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let factory = SourceFactory::new();
        let err = factory
            .create("nope", "x", &Options::new(), &SourceContext::default())
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::UnknownType(t) if t == "nope"));
    }

    #[test]
    fn constructor_errors_propagate() {
        let factory = SourceFactory::new();
        factory.register("strict", |_name: &str, _opts: &Options, _ctx: &SourceContext| {
            Err(SourceError::MissingOption("path".into()))
        });
        let err = factory
            .create("strict", "x", &Options::new(), &SourceContext::default())
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::MissingOption(_)));
    }
}
