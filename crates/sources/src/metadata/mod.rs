//! EC2 instance metadata.

pub mod parser;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use propd_core::{Options, Source, SourceContext, SourceCore, SourceError, SourcePlugin};
use serde_json::Value;

use parser::RawMetadata;

pub const METADATA_TYPE: &str = "ec2-metadata";

inventory::submit! {
    SourcePlugin { source_type: METADATA_TYPE, create: MetadataSource::create }
}

/// Resolves the auto-scaling group an instance belongs to.
#[async_trait]
pub trait GroupLookup: Send + Sync {
    async fn auto_scaling_group(&self, region: &str, instance_id: &str) -> Option<String>;
}

/// [`GroupLookup`] backed by the AWS Auto Scaling API.
#[derive(Debug, Default)]
pub struct AutoScalingLookup;

#[async_trait]
impl GroupLookup for AutoScalingLookup {
    async fn auto_scaling_group(&self, region: &str, instance_id: &str) -> Option<String> {
        tracing::debug!(instance_id, region, "looking up auto-scaling group");
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_autoscaling::Client::new(&config);
        match client
            .describe_auto_scaling_instances()
            .instance_ids(instance_id)
            .send()
            .await
        {
            Ok(output) => {
                let groups: Vec<&str> = output
                    .auto_scaling_instances()
                    .iter()
                    .map(|i| i.auto_scaling_group_name())
                    .collect();
                if groups.len() > 1 {
                    tracing::warn!(instance_id, "instance is in multiple auto-scaling groups");
                }
                groups.first().map(|g| g.to_string())
            }
            Err(e) => {
                tracing::warn!(instance_id, error = %e, "auto-scaling group lookup failed");
                None
            }
        }
    }
}

pub struct MetadataSource {
    core: SourceCore,
    client: reqwest::Client,
    base_url: String,
    groups: Arc<dyn GroupLookup>,
}

impl MetadataSource {
    pub fn new(
        name: &str,
        options: &Options,
        ctx: &SourceContext,
        groups: Arc<dyn GroupLookup>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(ctx.config.metadata.timeout())
            .build()?;
        Ok(Self {
            core: SourceCore::new(name, METADATA_TYPE, options.clone(), ctx),
            client,
            base_url: ctx.config.metadata.base_url(),
            groups,
        })
    }

    pub fn create(
        name: &str,
        options: &Options,
        ctx: &SourceContext,
    ) -> Result<Arc<dyn Source>, SourceError> {
        Ok(Arc::new(Self::new(name, options, ctx, Arc::new(AutoScalingLookup))?))
    }

    /// Walk the metadata tree from the known roots. Directory listings end in
    /// `/`; paths that do not answer 200 are skipped.
    async fn walk(&self) -> Result<RawMetadata, SourceError> {
        let mut pending: VecDeque<String> = parser::roots().into_iter().map(String::from).collect();
        let mut raw = RawMetadata::new();

        while let Some(path) = pending.pop_front() {
            let response = self
                .client
                .get(format!("{}/{}", self.base_url, path))
                .send()
                .await?;
            if !response.status().is_success() {
                tracing::debug!(path = %path, status = %response.status(), "metadata path unavailable");
                continue;
            }
            let body = response.text().await?;
            if path.ends_with('/') {
                pending.extend(
                    body.lines()
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(|item| format!("{path}{item}")),
                );
            } else {
                raw.insert(path, body);
            }
        }
        Ok(raw)
    }
}

#[async_trait]
impl Source for MetadataSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn poll_once(&self) -> Result<(), SourceError> {
        let raw = self.walk().await?;
        let mut properties = parser::parse(&raw);
        tracing::debug!(source = %self.core.name(), paths = raw.len(), "fetched instance metadata");

        let instance_id = properties.get("instance-id").and_then(Value::as_str).map(String::from);
        let region = properties
            .get("availability-zone")
            .and_then(Value::as_str)
            .and_then(parser::region_from_zone)
            .map(String::from);
        if let (Some(instance_id), Some(region)) = (instance_id, region) {
            let cached = self
                .core
                .properties()
                .get("auto-scaling-group")
                .filter(|g| !g.is_null())
                .cloned();
            let group = match cached {
                Some(group) => {
                    tracing::debug!("using cached auto-scaling group");
                    group
                }
                None => self
                    .groups
                    .auto_scaling_group(&region, &instance_id)
                    .await
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            };
            properties.insert("auto-scaling-group".into(), group);
        }

        self.core.accept_content(properties);
        Ok(())
    }
}
