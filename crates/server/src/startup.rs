//! Process bootstrap: logging, the source manager, and the built-in sources.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use propd_core::config::LogConfig;
use propd_core::{Config, EventBus, Options, SourceContext};
use propd_engine::{ManagerOptions, Reconciler, SourceManager};
use propd_sources::metadata::METADATA_TYPE;
use propd_sources::s3::S3_INDEX_TYPE;
use propd_sources::tags::TAGS_TYPE;

/// Namespace the instance metadata is mounted under.
pub const INSTANCE_NAMESPACE: &str = "instance";
pub const TAGS_NAMESPACE: &str = "instance:tags";

/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wire the event bus, manager and reconciler, then schedule the bootstrap
/// sources. Jobs stay pending until [`SourceManager::start`].
pub fn bootstrap(config: Arc<Config>) -> anyhow::Result<Arc<SourceManager>> {
    let bus = Arc::new(EventBus::new());
    let ctx = SourceContext::new(Arc::clone(&bus), Arc::clone(&config));
    let manager = Arc::new(SourceManager::new(
        Arc::clone(&bus),
        ManagerOptions::from_config(&config),
    ));
    let factory = Arc::new(propd_sources::factory());

    // Must be listening before the index can publish.
    Reconciler::new(&manager, Arc::clone(&factory), ctx.clone(), Some(config.index.interval()))
        .subscribe(&bus);

    for (source_type, namespace, interval) in [
        (METADATA_TYPE, INSTANCE_NAMESPACE, config.metadata.interval()),
        (TAGS_TYPE, TAGS_NAMESPACE, config.tags.interval()),
    ] {
        match factory.create(source_type, source_type, &Options::new(), &ctx) {
            Ok(source) => {
                manager.schedule(source, namespace, false, Some(interval));
            }
            Err(e) => error!(source = source_type, error = %e, "unable to create bootstrap source"),
        }
    }

    match index_options(&config) {
        Some(options) => {
            let index = factory
                .create(S3_INDEX_TYPE, S3_INDEX_TYPE, &options, &ctx)
                .context("failed to create the index source")?;
            let job = manager.schedule(index, "", true, Some(config.index.interval()));
            info!(job_id = %job.id, path = %config.index.path, "index source scheduled");
        }
        None => warn!("index.bucket is not set, running without a remote index"),
    }

    Ok(manager)
}

fn index_options(config: &Config) -> Option<Options> {
    let bucket = config.index.bucket.as_deref().filter(|b| !b.is_empty())?;
    match json!({
        "bucket": bucket,
        "path": config.index.path,
        "region": config.index.region,
    }) {
        Value::Object(options) => Some(options),
        _ => None,
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_without_index() {
        let manager = bootstrap(Arc::new(Config::default())).unwrap();

        assert!(manager.is_scheduled(METADATA_TYPE));
        assert!(manager.is_scheduled(TAGS_TYPE));
        assert!(manager.indices().is_empty());
        assert_eq!(
            manager.registration(TAGS_TYPE).map(|r| r.namespace),
            Some(TAGS_NAMESPACE.to_string())
        );
        assert!(!manager.scheduler().is_running());
    }

    #[tokio::test]
    async fn bootstrap_with_index() {
        let mut config = Config::default();
        config.index.bucket = Some("cfg-bucket".into());
        config.index.endpoint = Some("http://127.0.0.1:4566".into());
        let manager = bootstrap(Arc::new(config)).unwrap();

        let indices = manager.indices();
        assert_eq!(indices.len(), 1);
        assert_eq!(indices[0].name(), S3_INDEX_TYPE);
        assert_eq!(indices[0].core().options().get("bucket"), Some(&json!("cfg-bucket")));
        assert!(manager.is_index(S3_INDEX_TYPE));
    }

    #[test]
    fn index_options_need_a_bucket() {
        let mut config = Config::default();
        assert!(index_options(&config).is_none());
        config.index.bucket = Some(String::new());
        assert!(index_options(&config).is_none());
        config.index.bucket = Some("b".into());
        let options = index_options(&config).unwrap();
        assert_eq!(options["path"], json!("index.json"));
        assert_eq!(options["region"], json!("us-east-1"));
    }
}
