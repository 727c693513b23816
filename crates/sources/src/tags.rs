//! EC2 instance tags.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_ec2::types::Filter;
use propd_core::{Options, Source, SourceContext, SourceCore, SourceError, SourcePlugin};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::metadata::parser::IDENTITY_DOCUMENT;

pub const TAGS_TYPE: &str = "ec2-tags";

inventory::submit! {
    SourcePlugin { source_type: TAGS_TYPE, create: TagsSource::create }
}

/// Fields of the instance identity document the tag lookup needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub region: String,
}

/// Lists the tags attached to an instance.
#[async_trait]
pub trait TagClient: Send + Sync {
    async fn instance_tags(&self, region: &str, instance_id: &str) -> Result<Vec<(String, String)>, SourceError>;
}

/// [`TagClient`] backed by `DescribeTags`.
#[derive(Debug, Default)]
pub struct Ec2TagClient;

#[async_trait]
impl TagClient for Ec2TagClient {
    async fn instance_tags(&self, region: &str, instance_id: &str) -> Result<Vec<(String, String)>, SourceError> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_ec2::Client::new(&config);
        let filter = Filter::builder().name("resource-id").values(instance_id).build();

        let mut tags = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = client
                .describe_tags()
                .filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(SourceError::aws)?;
            tags.extend(output.tags().iter().filter_map(|tag| {
                Some((tag.key()?.to_string(), tag.value().unwrap_or_default().to_string()))
            }));
            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(tags)
    }
}

pub struct TagsSource {
    core: SourceCore,
    http: reqwest::Client,
    base_url: String,
    tags: Arc<dyn TagClient>,
}

impl TagsSource {
    pub fn new(
        name: &str,
        options: &Options,
        ctx: &SourceContext,
        tags: Arc<dyn TagClient>,
    ) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(ctx.config.metadata.timeout())
            .build()?;
        Ok(Self {
            core: SourceCore::new(name, TAGS_TYPE, options.clone(), ctx),
            http,
            base_url: ctx.config.metadata.base_url(),
            tags,
        })
    }

    pub fn create(
        name: &str,
        options: &Options,
        ctx: &SourceContext,
    ) -> Result<Arc<dyn Source>, SourceError> {
        Ok(Arc::new(Self::new(name, options, ctx, Arc::new(Ec2TagClient))?))
    }

    async fn identity(&self) -> Result<InstanceIdentity, SourceError> {
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, IDENTITY_DOCUMENT))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// `{key: value}` for every tag; later duplicates win.
pub fn tags_to_properties(tags: Vec<(String, String)>) -> Map<String, Value> {
    tags.into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

#[async_trait]
impl Source for TagsSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn poll_once(&self) -> Result<(), SourceError> {
        let identity = self.identity().await?;
        let tags = self
            .tags
            .instance_tags(&identity.region, &identity.instance_id)
            .await?;
        tracing::debug!(source = %self.core.name(), count = tags.len(), "fetched instance tags");
        self.core.accept_content(tags_to_properties(tags));
        Ok(())
    }
}
