//! Regrouping of enriched series by the labels the rules added.
//!
//! Series are keyed by the subset of their labels that appears in the tracked
//! label set. Series sharing a key collapse into one output series carrying
//! only those labels, with sample values summed. A series with none of the
//! tracked labels is dropped from the output.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::{LabelSet, QueryResult, Sample, Series};

/// Sorted, comma-joined `label=value` encoding of a label subset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(String);

impl GroupKey {
    /// `labels` iterates in sorted key order, so the encoding does not depend
    /// on the order labels were inserted.
    pub fn new(labels: &LabelSet) -> Self {
        let parts: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        GroupKey(parts.join(","))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuilds the result list grouped by `labels`.
///
/// Only `vector` and `matrix` results are regrouped; other result types are
/// returned as they are. Output order is unspecified.
pub fn regroup(mut result: QueryResult, labels: &BTreeSet<String>) -> QueryResult {
    let series = std::mem::take(&mut result.data.result);
    result.data.result = if result.is_vector() {
        regroup_vector(series, labels)
    } else if result.is_matrix() {
        regroup_matrix(series, labels)
    } else {
        series
    };
    result
}

fn tracked_subset(metric: &LabelSet, labels: &BTreeSet<String>) -> LabelSet {
    metric
        .iter()
        .filter(|(name, _)| labels.contains(*name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Sums `other` into `acc`, keeping `acc`'s timestamp.
fn merge_sample(acc: &mut Sample, other: &Sample) {
    let sum = acc.lenient_value().saturating_add(other.lenient_value());
    acc.1 = sum.to_string();
}

fn regroup_vector(series: Vec<Series>, labels: &BTreeSet<String>) -> Vec<Series> {
    let mut groups: BTreeMap<GroupKey, Series> = BTreeMap::new();

    for s in series {
        let subset = tracked_subset(&s.metric, labels);
        if subset.is_empty() {
            continue;
        }

        match groups.entry(GroupKey::new(&subset)) {
            Entry::Vacant(e) => {
                e.insert(Series {
                    metric: subset,
                    value: s.value,
                    values: None,
                });
            }
            Entry::Occupied(mut e) => {
                let acc = e.get_mut();
                if let Some(b) = s.value {
                    if let Some(a) = acc.value.as_mut() {
                        merge_sample(a, &b);
                    } else {
                        acc.value = Some(b);
                    }
                }
            }
        }
    }

    groups.into_values().collect()
}

fn regroup_matrix(series: Vec<Series>, labels: &BTreeSet<String>) -> Vec<Series> {
    let mut groups: BTreeMap<GroupKey, Series> = BTreeMap::new();

    for s in series {
        let subset = tracked_subset(&s.metric, labels);
        if subset.is_empty() {
            continue;
        }

        match groups.entry(GroupKey::new(&subset)) {
            Entry::Vacant(e) => {
                e.insert(Series {
                    metric: subset,
                    value: None,
                    values: s.values,
                });
            }
            Entry::Occupied(mut e) => {
                let acc = e.get_mut().values.get_or_insert_with(Vec::new);
                // Same-index samples are summed; indices are assumed aligned.
                for (i, sample) in s.values.unwrap_or_default().into_iter().enumerate() {
                    match acc.get_mut(i) {
                        Some(a) => merge_sample(a, &sample),
                        None => acc.push(sample),
                    }
                }
            }
        }
    }

    groups.into_values().collect()
}
