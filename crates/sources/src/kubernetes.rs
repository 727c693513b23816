//! Pod identity when running inside a Kubernetes cluster.
//!
//! Outside a cluster the source shuts itself down on construction and never
//! contributes to the tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use propd_core::{Options, Source, SourceContext, SourceCore, SourceError, SourcePlugin};
use serde_json::{Map, Value};

use crate::optional_str;

pub const KUBERNETES_TYPE: &str = "kubernetes";
pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

inventory::submit! {
    SourcePlugin { source_type: KUBERNETES_TYPE, create: KubernetesSource::create }
}

/// Whether the process sees the in-cluster service environment.
pub fn in_cluster() -> bool {
    ["KUBERNETES_SERVICE_HOST", "KUBERNETES_SERVICE_PORT"]
        .iter()
        .all(|key| std::env::var(key).is_ok_and(|v| !v.is_empty()))
}

fn pod_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .unwrap_or_default()
}

pub struct KubernetesSource {
    core: SourceCore,
    namespace_file: PathBuf,
}

impl KubernetesSource {
    /// `enabled` is the in-cluster check; a disabled source is shut down
    /// before it is returned.
    pub fn new(name: &str, options: &Options, ctx: &SourceContext, enabled: bool) -> Self {
        let source = Self {
            core: SourceCore::new(name, KUBERNETES_TYPE, options.clone(), ctx),
            namespace_file: optional_str(options, "namespace_file")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(NAMESPACE_FILE)),
        };
        if !enabled {
            tracing::debug!(source = %name, "not running in a kubernetes cluster, disabling source");
            source.core.shutdown();
        }
        source
    }

    pub fn create(
        name: &str,
        options: &Options,
        ctx: &SourceContext,
    ) -> Result<Arc<dyn Source>, SourceError> {
        Ok(Arc::new(Self::new(name, options, ctx, in_cluster())))
    }

    pub fn namespace_file(&self) -> &Path {
        &self.namespace_file
    }
}

#[async_trait]
impl Source for KubernetesSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn poll_once(&self) -> Result<(), SourceError> {
        let namespace = tokio::fs::read_to_string(&self.namespace_file).await?;
        let mut properties = Map::new();
        properties.insert("pod".into(), Value::String(pod_name()));
        properties.insert("namespace".into(), Value::String(namespace.trim().to_string()));
        self.core.accept_content(properties);
        Ok(())
    }
}
