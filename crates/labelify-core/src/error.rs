//! Error types, one enum per concern.

use std::path::PathBuf;

/// Startup-time configuration failures. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unknown source type '{kind}' for source '{name}'")]
    UnknownSourceType { name: String, kind: String },
    #[error("duplicate source name '{0}'")]
    DuplicateSource(String),
    #[error("upstream url is not configured (config.prometheus.url)")]
    MissingUpstream,
    #[error("invalid upstream url '{url}': {reason}")]
    InvalidUpstream { url: String, reason: String },
    #[error("failed to build http client for source '{name}': {source}")]
    Client {
        name: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Failures while fetching a mapping snapshot from a remote endpoint.
///
/// These never reach readers of a source: the refresh path logs them and
/// keeps the previous snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid http method '{0}'")]
    Method(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed mappings payload: {0}")]
    Body(#[from] serde_json::Error),
}

/// Hard failures on the request path.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to serialize enriched response: {0}")]
    Serialize(#[source] serde_json::Error),
}
