//! Service addresses from the Consul catalog.

pub mod parser;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use propd_core::{Options, Source, SourceContext, SourceCore, SourceError, SourcePlugin};

use crate::optional_str;
use parser::HealthEntry;

pub const CONSUL_TYPE: &str = "consul";

inventory::submit! {
    SourcePlugin { source_type: CONSUL_TYPE, create: ConsulSource::create }
}

pub struct ConsulSource {
    core: SourceCore,
    client: reqwest::Client,
    base_url: String,
}

impl ConsulSource {
    /// `host`, `port` and `scheme` options override the `[consul]` config.
    pub fn new(name: &str, options: &Options, ctx: &SourceContext) -> Result<Self, SourceError> {
        let defaults = &ctx.config.consul;
        let host = optional_str(options, "host").unwrap_or(defaults.host.as_str());
        let scheme = optional_str(options, "scheme").unwrap_or(defaults.scheme.as_str());
        let port = match options.get("port") {
            None => defaults.port,
            Some(value) => value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| SourceError::InvalidOption {
                    name: "port".into(),
                    reason: format!("`{value}` is not a port number"),
                })?,
        };

        Ok(Self {
            core: SourceCore::new(name, CONSUL_TYPE, options.clone(), ctx),
            client: reqwest::Client::new(),
            base_url: format!("{scheme}://{host}:{port}"),
        })
    }

    pub fn create(
        name: &str,
        options: &Options,
        ctx: &SourceContext,
    ) -> Result<Arc<dyn Source>, SourceError> {
        Ok(Arc::new(Self::new(name, options, ctx)?))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn services(&self) -> Result<Vec<String>, SourceError> {
        let services: BTreeMap<String, Vec<String>> = self
            .client
            .get(format!("{}/v1/catalog/services", self.base_url))
            .query(&[("stale", "")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(services.into_keys().collect())
    }

    async fn passing(&self, service: &str) -> Result<Vec<HealthEntry>, SourceError> {
        Ok(self
            .client
            .get(format!("{}/v1/health/service/{}", self.base_url, service))
            .query(&[("passing", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl Source for ConsulSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn poll_once(&self) -> Result<(), SourceError> {
        let names = self.services().await?;
        let mut services = Vec::with_capacity(names.len());
        for name in names {
            let entries = self.passing(&name).await?;
            services.push((name, entries));
        }
        tracing::debug!(source = %self.core.name(), services = services.len(), "fetched consul catalog");
        self.core.accept_content(parser::parse(services));
        Ok(())
    }
}
