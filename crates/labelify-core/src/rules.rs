//! Rule matching engine: attaches labels from mapping sources to series.
//!
//! A rule applies to a response when its metric name occurs anywhere in the
//! originating query text. Plain substring containment, so a rule for `foo`
//! also fires for a query over `foobar`.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::EnrichmentRule;
use crate::model::{QueryResult, Series};
use crate::source::{SourceRegistry, SourceSnapshot};

/// Per-request counters, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyStats {
    /// Rules whose metric occurs in the query.
    pub rules_applied: usize,
    /// Applicable rules skipped because their source is missing or failing.
    pub rules_skipped: usize,
    /// Series that matched a mapping pattern.
    pub matched: usize,
    /// Series that got the fallback labels.
    pub fallback: usize,
}

pub struct RuleEngine {
    rules: Vec<EnrichmentRule>,
    registry: Arc<SourceRegistry>,
}

impl RuleEngine {
    pub fn new(rules: Vec<EnrichmentRule>, registry: Arc<SourceRegistry>) -> Self {
        Self { rules, registry }
    }

    pub fn rules(&self) -> &[EnrichmentRule] {
        &self.rules
    }

    fn rules_for<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a EnrichmentRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| query.contains(rule.matcher.metric.as_str()))
    }

    /// True when some rule's metric occurs in `query` and at least one series
    /// already carries that rule's match label.
    pub fn is_applicable(&self, query: &str, result: &QueryResult) -> bool {
        self.rules_for(query).any(|rule| {
            result
                .data
                .result
                .iter()
                .any(|series| series.metric.contains_key(&rule.matcher.label))
        })
    }

    /// Union of `add_labels` over the rules that apply to `query`.
    pub fn tracked_labels(&self, query: &str) -> BTreeSet<String> {
        self.rules_for(query)
            .flat_map(|rule| rule.add_labels.iter().cloned())
            .collect()
    }

    /// Runs every applicable rule, in config order, over the series in place.
    pub fn apply(&self, result: &mut QueryResult, query: &str) -> ApplyStats {
        let mut stats = ApplyStats::default();

        for rule in self.rules_for(query) {
            stats.rules_applied += 1;
            debug!(metric = %rule.matcher.metric, source = %rule.enrich_from, "evaluating rule");

            let Some(source) = self.registry.lookup(&rule.enrich_from) else {
                warn!(source = %rule.enrich_from, metric = %rule.matcher.metric, "source not found for rule");
                stats.rules_skipped += 1;
                continue;
            };

            let snapshot = match source.mappings() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(source = %rule.enrich_from, error = %e, "failed to read mappings");
                    stats.rules_skipped += 1;
                    continue;
                }
            };

            for series in result.data.result.iter_mut() {
                match enrich_series(series, rule, &snapshot) {
                    Some(true) => stats.matched += 1,
                    Some(false) => stats.fallback += 1,
                    None => {}
                }
            }
        }

        stats
    }
}

/// Applies one rule to one series.
///
/// Returns `Some(true)` on a mapping match, `Some(false)` when the fallback
/// was applied, `None` when the series was left alone.
fn enrich_series(series: &mut Series, rule: &EnrichmentRule, snapshot: &SourceSnapshot) -> Option<bool> {
    let value = series.metric.get(&rule.matcher.label)?;
    if value.is_empty() {
        return None;
    }

    match snapshot.lookup(value) {
        Some(labels) => {
            for name in &rule.add_labels {
                if let Some(v) = labels.get(name) {
                    series.metric.insert(name.clone(), v.clone());
                }
            }
            Some(true)
        }
        None if !rule.fallback.is_empty() => {
            for (name, v) in &rule.fallback {
                series.metric.insert(name.clone(), v.clone());
            }
            Some(false)
        }
        None => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{MatchRule, SourceData};
    use crate::model::{LabelSet, QueryData, Sample};
    use crate::source::StaticSource;
    use std::collections::BTreeMap;

    pub(crate) const QUERY: &str = "sum(kube_deployment_spec_replicas) by (deployment)";

    pub(crate) fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub(crate) fn vector(series: &[(&[(&str, &str)], &str)]) -> QueryResult {
        QueryResult {
            status: "success".to_string(),
            data: QueryData {
                result_type: "vector".to_string(),
                result: series
                    .iter()
                    .map(|(l, v)| Series {
                        metric: labels(l),
                        value: Some(Sample(182778586.0, v.to_string())),
                        values: None,
                    })
                    .collect(),
                extra: Default::default(),
            },
            extra: Default::default(),
        }
    }

    pub(crate) fn deployments() -> QueryResult {
        vector(&[
            (&[("deployment", "coredns")], "1"),
            (&[("deployment", "microservice-1")], "2"),
            (&[("deployment", "microservice-2")], "3"),
        ])
    }

    pub(crate) fn registry(sources: &[(&str, &[(&str, &[(&str, &str)])])]) -> Arc<SourceRegistry> {
        let mut registry = SourceRegistry::default();
        for (name, entries) in sources {
            let mappings: BTreeMap<String, SourceData> = entries
                .iter()
                .map(|(pattern, l)| (pattern.to_string(), SourceData { labels: labels(l) }))
                .collect();
            registry.insert(Arc::new(StaticSource::new(*name, mappings)));
        }
        Arc::new(registry)
    }

    pub(crate) fn rule(metric: &str, label: &str, from: &str, add: &[&str], fallback: &[(&str, &str)]) -> EnrichmentRule {
        EnrichmentRule {
            matcher: MatchRule {
                metric: metric.to_string(),
                label: label.to_string(),
            },
            enrich_from: from.to_string(),
            add_labels: add.iter().map(|s| s.to_string()).collect(),
            fallback: labels(fallback),
        }
    }

    fn teams_registry() -> Arc<SourceRegistry> {
        registry(&[(
            "teams",
            &[
                ("coredns", &[("team", "networking"), ("cost_center", "cc-1")]),
                ("microservice-.*", &[("team", "engineering")]),
            ],
        )])
    }

    #[test]
    fn test_apply_copies_only_add_labels() {
        let engine = RuleEngine::new(
            vec![rule("kube_deployment_spec_replicas", "deployment", "teams", &["team"], &[])],
            teams_registry(),
        );
        let mut result = deployments();

        let stats = engine.apply(&mut result, QUERY);

        assert_eq!(stats.matched, 3);
        assert_eq!(stats.fallback, 0);
        let coredns = &result.data.result[0].metric;
        assert_eq!(coredns, &labels(&[("deployment", "coredns"), ("team", "networking")]));
        assert_eq!(result.data.result[1].metric["team"], "engineering");
        assert_eq!(result.data.result[2].metric["team"], "engineering");
    }

    #[test]
    fn test_add_label_missing_from_entry_is_skipped() {
        let engine = RuleEngine::new(
            vec![rule("kube_deployment_spec_replicas", "deployment", "teams", &["team", "cost_center"], &[])],
            teams_registry(),
        );
        let mut result = deployments();
        result.data.result[1].metric.insert("cost_center".into(), "keep".into());

        engine.apply(&mut result, QUERY);

        assert_eq!(result.data.result[0].metric["cost_center"], "cc-1");
        // Entry for microservice-.* has no cost_center: existing label untouched.
        assert_eq!(result.data.result[1].metric["cost_center"], "keep");
        assert!(!result.data.result[2].metric.contains_key("cost_center"));
    }

    #[test]
    fn test_fallback_applied_when_nothing_matches() {
        let registry = registry(&[("teams", &[("coredns", &[("team", "networking")])])]);
        let engine = RuleEngine::new(
            vec![rule(
                "kube_deployment_spec_replicas",
                "deployment",
                "teams",
                &["team"],
                &[("team", "unknown"), ("owner", "nobody")],
            )],
            registry,
        );
        let mut result = deployments();

        let stats = engine.apply(&mut result, QUERY);

        assert_eq!(stats.matched, 1);
        assert_eq!(stats.fallback, 2);
        assert_eq!(result.data.result[0].metric["team"], "networking");
        assert!(!result.data.result[0].metric.contains_key("owner"));
        assert_eq!(result.data.result[1].metric["team"], "unknown");
        assert_eq!(result.data.result[1].metric["owner"], "nobody");
    }

    #[test]
    fn test_no_match_no_fallback_leaves_series_untouched() {
        let registry = registry(&[("teams", &[("coredns", &[("team", "networking")])])]);
        let engine = RuleEngine::new(
            vec![rule("kube_deployment_spec_replicas", "deployment", "teams", &["team"], &[])],
            registry,
        );
        let mut result = deployments();
        let before = result.data.result[1].clone();

        engine.apply(&mut result, QUERY);

        assert_eq!(result.data.result[1], before);
    }

    #[test]
    fn test_empty_or_missing_match_label_is_ignored() {
        let engine = RuleEngine::new(
            vec![rule("kube_deployment_spec_replicas", "deployment", "teams", &["team"], &[("team", "unknown")])],
            teams_registry(),
        );
        let mut result = vector(&[(&[("deployment", "")], "1"), (&[("pod", "x")], "2")]);

        let stats = engine.apply(&mut result, QUERY);

        assert_eq!(stats, ApplyStats { rules_applied: 1, ..Default::default() });
        assert!(!result.data.result[0].metric.contains_key("team"));
        assert!(!result.data.result[1].metric.contains_key("team"));
    }

    #[test]
    fn test_rule_not_in_query_is_not_applied() {
        let engine = RuleEngine::new(
            vec![rule("kube_pod_info", "deployment", "teams", &["team"], &[])],
            teams_registry(),
        );
        let mut result = deployments();
        let before = result.clone();

        let stats = engine.apply(&mut result, QUERY);

        assert_eq!(stats.rules_applied, 0);
        assert_eq!(result, before);
        assert!(!engine.is_applicable(QUERY, &result));
        assert!(engine.tracked_labels(QUERY).is_empty());
    }

    #[test]
    fn test_substring_containment() {
        let engine = RuleEngine::new(
            vec![rule("kube_deployment", "deployment", "teams", &["team"], &[])],
            teams_registry(),
        );
        assert!(engine.is_applicable(QUERY, &deployments()));
    }

    #[test]
    fn test_missing_source_skips_rule_and_continues() {
        let engine = RuleEngine::new(
            vec![
                rule("kube_deployment_spec_replicas", "deployment", "nowhere", &["owner"], &[]),
                rule("kube_deployment_spec_replicas", "deployment", "teams", &["team"], &[]),
            ],
            teams_registry(),
        );
        let mut result = deployments();

        let stats = engine.apply(&mut result, QUERY);

        assert_eq!(stats.rules_applied, 2);
        assert_eq!(stats.rules_skipped, 1);
        assert_eq!(result.data.result[0].metric["team"], "networking");
    }

    #[test]
    fn test_later_fallback_overwrites_earlier_rule() {
        let registry = registry(&[
            ("teams", &[("coredns", &[("team", "networking")])]),
            ("empty", &[]),
        ]);
        let engine = RuleEngine::new(
            vec![
                rule("kube_deployment_spec_replicas", "deployment", "teams", &["team"], &[]),
                rule("kube_deployment_spec_replicas", "deployment", "empty", &["team"], &[("team", "unknown")]),
            ],
            registry,
        );
        let mut result = deployments();

        engine.apply(&mut result, QUERY);

        assert_eq!(result.data.result[0].metric["team"], "unknown");
    }

    #[test]
    fn test_is_applicable_requires_match_label() {
        let engine = RuleEngine::new(
            vec![rule("kube_deployment_spec_replicas", "deployment", "teams", &["team"], &[])],
            teams_registry(),
        );
        assert!(engine.is_applicable(QUERY, &deployments()));
        assert!(!engine.is_applicable(QUERY, &vector(&[(&[("pod", "x")], "1")])));
    }

    #[test]
    fn test_tracked_labels_union() {
        let engine = RuleEngine::new(
            vec![
                rule("kube_deployment_spec_replicas", "deployment", "teams", &["team", "unit"], &[]),
                rule("kube_deployment", "deployment", "teams", &["team", "owner"], &[]),
                rule("node_cpu_seconds_total", "instance", "teams", &["rack"], &[]),
            ],
            teams_registry(),
        );
        let tracked: Vec<_> = engine.tracked_labels(QUERY).into_iter().collect();
        assert_eq!(tracked, vec!["owner", "team", "unit"]);
    }
}
