//! Configuration document: upstream, sources and enrichment rules.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::model::LabelSet;

/// Query routes enriched when `server.enrich_paths` is not set.
pub const DEFAULT_ENRICH_PATHS: &[&str] = &["/api/v1/query", "/api/v1/query_range"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub config: ServerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub enrichment: Enrichment,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub prometheus: UpstreamConfig,
    #[serde(default)]
    pub server: ListenConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Paths whose responses are enriched. Empty means every path.
    #[serde(default = "default_enrich_paths")]
    pub enrich_paths: Vec<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            enrich_paths: default_enrich_paths(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_enrich_paths() -> Vec<String> {
    DEFAULT_ENRICH_PATHS.iter().map(|p| p.to_string()).collect()
}

/// One named mapping source. `kind` is the `type` discriminator
/// (`yaml` or `http`), resolved by the source registry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: HttpSourceConfig,
    #[serde(default)]
    pub mappings: BTreeMap<String, SourceData>,
}

/// Remote endpoint settings for `http` sources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpSourceConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub refresh_interval: String,
    #[serde(default)]
    pub timeout: String,
}

/// Labels attached to one mapping pattern.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceData {
    #[serde(default)]
    pub labels: LabelSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Enrichment {
    #[serde(default)]
    pub rules: Vec<EnrichmentRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrichmentRule {
    #[serde(rename = "match")]
    pub matcher: MatchRule,
    pub enrich_from: String,
    #[serde(default)]
    pub add_labels: Vec<String>,
    #[serde(default)]
    pub fallback: LabelSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchRule {
    pub metric: String,
    pub label: String,
}

impl Config {
    /// Reads, parses and validates a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading config");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses and validates a config document (YAML or JSON).
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let upstream = self.config.prometheus.url.trim();
        if upstream.is_empty() {
            return Err(ConfigError::MissingUpstream);
        }
        reqwest::Url::parse(upstream).map_err(|e| ConfigError::InvalidUpstream {
            url: upstream.to_string(),
            reason: e.to_string(),
        })?;

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
        }

        for rule in &self.enrichment.rules {
            if !names.contains(rule.enrich_from.as_str()) {
                warn!(
                    metric = %rule.matcher.metric,
                    source = %rule.enrich_from,
                    "rule references unknown source, it will be skipped"
                );
            }
        }

        Ok(())
    }

    fn log_summary(&self) {
        info!(
            sources = self.sources.len(),
            rules = self.enrichment.rules.len(),
            upstream = %self.config.prometheus.url,
            "config loaded"
        );
        for source in &self.sources {
            info!(
                name = %source.name,
                kind = %source.kind,
                mappings = source.mappings.len(),
                "source"
            );
        }
        for rule in &self.enrichment.rules {
            info!(
                metric = %rule.matcher.metric,
                label = %rule.matcher.label,
                enrich_from = %rule.enrich_from,
                "rule"
            );
        }
    }
}
