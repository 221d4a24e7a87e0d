//! Mappings defined inline in the config.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{MappingSource, SourceSnapshot};
use crate::config::SourceData;
use crate::error::SourceError;

/// Fixed snapshot built at startup. Never refreshes, never fails.
pub struct StaticSource {
    name: String,
    snapshot: Arc<SourceSnapshot>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, mappings: BTreeMap<String, SourceData>) -> Self {
        let name = name.into();
        let snapshot = Arc::new(SourceSnapshot::new(&name, mappings));
        Self { name, snapshot }
    }
}

impl MappingSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mappings(&self) -> Result<Arc<SourceSnapshot>, SourceError> {
        Ok(self.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::data;

    #[test]
    fn test_static_source_returns_same_snapshot() {
        let mut mappings = BTreeMap::new();
        mappings.insert("coredns".to_string(), data(&[("team", "networking")]));
        let source = StaticSource::new("teams", mappings);

        assert_eq!(source.name(), "teams");
        let a = source.mappings().unwrap();
        let b = source.mappings().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.get("coredns").unwrap()["team"], "networking");
    }
}
