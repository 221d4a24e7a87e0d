//! Mapping sources: providers of pattern → label-set data.
//!
//! This module defines the `MappingSource` trait that lets the rule engine
//! read mappings without knowing where they come from:
//! - `StaticSource`: inline mappings from the config, fixed for process lifetime
//! - `PollingSource`: mappings fetched from a remote endpoint and refreshed on a timer
//!
//! Both hand out `Arc<SourceSnapshot>`; a snapshot is immutable once built.

mod polling;
mod registry;
mod static_source;

pub use polling::PollingSource;
pub use registry::SourceRegistry;
pub use static_source::StaticSource;

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::config::SourceData;
use crate::error::{ConfigError, SourceError};
use crate::model::LabelSet;

/// Source type, parsed once from the config `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Inline mappings (`type: yaml`).
    Static,
    /// Remote endpoint (`type: http`).
    Polling,
}

impl SourceKind {
    pub fn parse(name: &str, kind: &str) -> Result<Self, ConfigError> {
        match kind {
            "yaml" => Ok(SourceKind::Static),
            "http" => Ok(SourceKind::Polling),
            other => Err(ConfigError::UnknownSourceType {
                name: name.to_string(),
                kind: other.to_string(),
            }),
        }
    }
}

/// Abstraction over mapping providers.
///
/// The trait is object-safe and used as `Arc<dyn MappingSource>`.
pub trait MappingSource: Send + Sync {
    /// Name the source was registered under.
    fn name(&self) -> &str;

    /// Returns the currently visible snapshot.
    ///
    /// The returned snapshot is complete: either the previous one or the
    /// newly refreshed one, never a mix.
    fn mappings(&self) -> Result<Arc<SourceSnapshot>, SourceError>;
}

/// Immutable view of one source's mappings with regexes compiled up front.
#[derive(Debug, Default)]
pub struct SourceSnapshot {
    entries: BTreeMap<String, SourceData>,
    // Patterns that compile as regexes, in `entries` order.
    regexes: Vec<(String, Regex)>,
}

impl SourceSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot, compiling every pattern once. Patterns that are not
    /// valid regexes still take part in exact matching.
    pub fn new(source: &str, entries: BTreeMap<String, SourceData>) -> Self {
        let mut regexes = Vec::with_capacity(entries.len());
        for pattern in entries.keys() {
            match Regex::new(pattern) {
                Ok(re) => regexes.push((pattern.clone(), re)),
                Err(e) => {
                    warn!(source, pattern = %pattern, error = %e, "pattern is not a valid regex, exact match only");
                }
            }
        }
        Self { entries, regexes }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels registered for a pattern, by exact pattern string.
    pub fn get(&self, pattern: &str) -> Option<&LabelSet> {
        self.entries.get(pattern).map(|d| &d.labels)
    }

    /// Finds the labels for a series label value.
    ///
    /// Exact pattern match wins; otherwise the first pattern whose regex
    /// matches somewhere in `value`.
    pub fn lookup(&self, value: &str) -> Option<&LabelSet> {
        if let Some(labels) = self.get(value) {
            return Some(labels);
        }
        self.regexes
            .iter()
            .find(|(_, re)| re.is_match(value))
            .and_then(|(pattern, _)| self.get(pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn data(pairs: &[(&str, &str)]) -> SourceData {
        SourceData {
            labels: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(SourceKind::parse("a", "yaml").unwrap(), SourceKind::Static);
        assert_eq!(SourceKind::parse("a", "http").unwrap(), SourceKind::Polling);
        let err = SourceKind::parse("a", "consul").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSourceType { ref kind, .. } if kind == "consul"));
    }

    #[test]
    fn test_lookup_exact_before_regex() {
        let mut entries = BTreeMap::new();
        // "api.*" sorts before "api-gateway" and would match it as a regex.
        entries.insert("api.*".to_string(), data(&[("team", "platform")]));
        entries.insert("api-gateway".to_string(), data(&[("team", "edge")]));
        let snapshot = SourceSnapshot::new("test", entries);

        assert_eq!(snapshot.lookup("api-gateway").unwrap()["team"], "edge");
        assert_eq!(snapshot.lookup("api-users").unwrap()["team"], "platform");
    }

    #[test]
    fn test_lookup_regex_fallback() {
        let mut entries = BTreeMap::new();
        entries.insert("microservice-.*".to_string(), data(&[("team", "engineering")]));
        let snapshot = SourceSnapshot::new("test", entries);

        assert_eq!(snapshot.lookup("microservice-7").unwrap()["team"], "engineering");
        assert!(snapshot.lookup("coredns").is_none());
    }

    #[test]
    fn test_invalid_regex_still_matches_exactly() {
        let mut entries = BTreeMap::new();
        entries.insert("broken[".to_string(), data(&[("team", "x")]));
        let snapshot = SourceSnapshot::new("test", entries);

        assert_eq!(snapshot.lookup("broken[").unwrap()["team"], "x");
        assert!(snapshot.lookup("broken").is_none());
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = SourceSnapshot::empty();
        assert!(snapshot.is_empty());
        assert!(snapshot.lookup("anything").is_none());
    }
}
