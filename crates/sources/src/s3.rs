//! JSON documents stored in S3, fetched with conditional GETs.
//!
//! The same adapter backs two plugin types: `s3` (a leaf source whose
//! output is the document's `properties`) and `s3-index` (the remote index,
//! registered as an index so its `UPDATE` payload drives reconciliation).

use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, ObjectStore};
use propd_core::fingerprint::content_signature;
use propd_core::{
    Options, PropertyStore, Source, SourceContext, SourceCore, SourceError, SourcePlugin,
    SourceStatus,
};
use serde_json::Value;

use crate::{optional_str, required_str};

pub const S3_TYPE: &str = "s3";
pub const S3_INDEX_TYPE: &str = "s3-index";
const DEFAULT_REGION: &str = "us-east-1";

inventory::submit! {
    SourcePlugin { source_type: S3_TYPE, create: S3Source::create }
}

inventory::submit! {
    SourcePlugin { source_type: S3_INDEX_TYPE, create: S3Source::create_index }
}

pub struct S3Source {
    core: SourceCore,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    path: ObjectPath,
}

impl S3Source {
    /// Validate options and connect to the configured S3 endpoint.
    pub fn new(
        name: &str,
        source_type: &str,
        options: &Options,
        ctx: &SourceContext,
    ) -> Result<Self, SourceError> {
        let bucket = required_str(options, "bucket")?;
        let region = optional_str(options, "region").unwrap_or(DEFAULT_REGION);

        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket);
        if let Some(endpoint) = ctx.config.index.endpoint.as_deref().filter(|e| !e.is_empty()) {
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.to_string()
            } else {
                format!("http://{endpoint}")
            };
            builder = builder
                .with_endpoint(&endpoint_url)
                .with_allow_http(endpoint_url.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }
        let store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);

        Self::with_store(name, source_type, options, ctx, store)
    }

    /// Build against an existing object store (any backend).
    pub fn with_store(
        name: &str,
        source_type: &str,
        options: &Options,
        ctx: &SourceContext,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, SourceError> {
        let bucket = required_str(options, "bucket")?.to_string();
        let path = required_str(options, "path")?;
        Ok(Self {
            core: SourceCore::new(name, source_type, options.clone(), ctx),
            store,
            bucket,
            path: ObjectPath::from(path),
        })
    }

    pub fn create(
        name: &str,
        options: &Options,
        ctx: &SourceContext,
    ) -> Result<Arc<dyn Source>, SourceError> {
        Ok(Arc::new(Self::new(name, S3_TYPE, options, ctx)?))
    }

    /// The index is always named after its type.
    pub fn create_index(
        _name: &str,
        options: &Options,
        ctx: &SourceContext,
    ) -> Result<Arc<dyn Source>, SourceError> {
        Ok(Arc::new(Self::new(S3_INDEX_TYPE, S3_INDEX_TYPE, options, ctx)?))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }
}

#[async_trait]
impl Source for S3Source {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn poll_once(&self) -> Result<(), SourceError> {
        let previous = self.core.signature();
        let options = GetOptions {
            if_none_match: previous.clone(),
            ..GetOptions::default()
        };

        let result = match self.store.get_opts(&self.path, options).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(
                    source = %self.core.name(),
                    bucket = %self.bucket,
                    path = %self.path,
                    "object does not exist"
                );
                self.core.set_status(SourceStatus::NoExist);
                return Ok(());
            }
            Err(object_store::Error::NotModified { .. }) => {
                tracing::debug!(source = %self.core.name(), path = %self.path, "object not modified");
                self.core.mark_unchanged();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let etag = result.meta.e_tag.clone();
        if etag.is_some() && etag == previous {
            tracing::debug!(source = %self.core.name(), path = %self.path, "etag unchanged");
            self.core.mark_unchanged();
            return Ok(());
        }

        let body = result.bytes().await?;
        let document = match serde_json::from_slice::<Value>(&body) {
            Ok(document @ Value::Object(_)) => document,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    source = %self.core.name(),
                    bucket = %self.bucket,
                    path = %self.path,
                    "unable to parse object body as a JSON object"
                );
                self.core.set_status(SourceStatus::Warning);
                return Ok(());
            }
        };

        let properties = document
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .map(PropertyStore::from)
            .unwrap_or_default();
        let signature = etag.unwrap_or_else(|| content_signature(&document));
        self.core.accept(signature, properties, document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use propd_core::{Config, SourceState};
    use serde_json::json;

    fn options(value: Value) -> Options {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_options_fail_construction() {
        let ctx = SourceContext::default();
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

        let err = S3Source::with_store("x", S3_TYPE, &options(json!({"path": "p"})), &ctx, store.clone())
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::MissingOption(ref o) if o == "bucket"));

        let err = S3Source::with_store("x", S3_TYPE, &options(json!({"bucket": "b"})), &ctx, store)
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::MissingOption(ref o) if o == "path"));
    }

    #[test]
    fn endpoint_override_builds_path_style_client() {
        let mut config = Config::default();
        config.index.endpoint = Some("localhost:4572".into());
        let ctx = SourceContext::new(Default::default(), Arc::new(config));

        let source = S3Source::new("x", S3_TYPE, &options(json!({"bucket": "b", "path": "p.json"})), &ctx)
            .unwrap();
        assert_eq!(source.bucket(), "b");
        assert_eq!(source.path().as_ref(), "p.json");
        assert_eq!(source.core().state(), SourceState::Created);
    }

    #[test]
    fn index_plugin_uses_fixed_name() {
        let ctx = SourceContext::default();
        let source = S3Source::create_index(
            "anything",
            &options(json!({"bucket": "b", "path": "index.json"})),
            &ctx,
        )
        .unwrap();
        assert_eq!(source.name(), "s3-index");
        assert_eq!(source.source_type(), "s3-index");
    }
}
