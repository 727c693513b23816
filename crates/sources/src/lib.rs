//! Backend adapters. Each module submits its plugin to the factory at link
//! time; [`factory`] collects them.

pub mod consul;
pub mod kubernetes;
pub mod metadata;
pub mod s3;
pub mod tags;

use propd_core::{Options, SourceError, SourceFactory};

pub use consul::ConsulSource;
pub use kubernetes::KubernetesSource;
pub use metadata::MetadataSource;
pub use s3::S3Source;
pub use tags::TagsSource;

/// Factory holding every adapter in this crate.
pub fn factory() -> SourceFactory {
    SourceFactory::from_plugins()
}

pub(crate) fn optional_str<'a>(options: &'a Options, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

pub(crate) fn required_str<'a>(options: &'a Options, key: &str) -> Result<&'a str, SourceError> {
    optional_str(options, key).ok_or_else(|| SourceError::MissingOption(key.to_string()))
}
