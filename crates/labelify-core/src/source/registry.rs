//! Named lookup of the configured mapping sources.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use super::{MappingSource, PollingSource, SourceKind, StaticSource};
use crate::config::SourceConfig;
use crate::error::ConfigError;

#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn MappingSource>>,
}

impl SourceRegistry {
    /// Builds one source per config entry.
    ///
    /// Every `type` is checked before any source is built, so an unknown type
    /// fails the whole registry without touching the network. Polling
    /// sources subscribe to `shutdown` to stop their refresh tasks.
    pub async fn from_config(
        configs: &[SourceConfig],
        shutdown: &broadcast::Sender<()>,
    ) -> Result<Self, ConfigError> {
        let kinds = configs
            .iter()
            .map(|c| SourceKind::parse(&c.name, &c.kind))
            .collect::<Result<Vec<_>, _>>()?;

        let mut registry = Self::default();
        for (config, kind) in configs.iter().zip(kinds) {
            let source: Arc<dyn MappingSource> = match kind {
                SourceKind::Static => {
                    Arc::new(StaticSource::new(&config.name, config.mappings.clone()))
                }
                SourceKind::Polling => {
                    Arc::new(PollingSource::start(config, shutdown.subscribe()).await?)
                }
            };
            info!(name = %config.name, kind = ?kind, "source ready");
            registry.insert(source);
        }
        Ok(registry)
    }

    /// Registers a source under its own name, replacing any previous one.
    pub fn insert(&mut self, source: Arc<dyn MappingSource>) {
        self.sources.insert(source.name().to_string(), source);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn MappingSource>> {
        self.sources.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
