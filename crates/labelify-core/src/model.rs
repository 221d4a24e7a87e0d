//! Query response envelope as returned by the metrics backend.
//!
//! Only the parts the enrichment touches are modelled; everything else in the
//! envelope is carried through `extra` so a rewritten body loses nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Instant query result type: one sample per series.
pub const RESULT_TYPE_VECTOR: &str = "vector";
/// Range query result type: a sequence of samples per series.
pub const RESULT_TYPE_MATRIX: &str = "matrix";

/// Label name → value. Keys are unique and kept sorted.
pub type LabelSet = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub status: String,
    pub data: QueryData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: Vec<Series>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One time series. Exactly one of `value` / `values` is set, depending on
/// the result type of the envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub metric: LabelSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Sample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Sample>>,
}

/// `[timestamp, "value"]` pair. Values stay string-encoded as on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample(pub f64, pub String);

impl Sample {
    /// Integer reading of the value; anything unparsable counts as zero.
    pub fn lenient_value(&self) -> i64 {
        self.1.trim().parse::<i64>().unwrap_or(0)
    }
}

impl QueryResult {
    pub fn is_vector(&self) -> bool {
        self.data.result_type == RESULT_TYPE_VECTOR
    }

    pub fn is_matrix(&self) -> bool {
        self.data.result_type == RESULT_TYPE_MATRIX
    }
}
