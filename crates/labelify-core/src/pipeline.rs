//! Response pipeline: decompress → parse → enrich → regroup → serialize.
//!
//! Anything that is not an enrichable query result leaves the response
//! untouched. Only a serialization failure after enrichment is an error.

use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use flate2::read::GzDecoder;
use tracing::debug;

use crate::aggregate;
use crate::config::EnrichmentRule;
use crate::error::PipelineError;
use crate::model::QueryResult;
use crate::rules::RuleEngine;
use crate::source::SourceRegistry;

/// What to send back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Forward the original bytes and headers as received.
    Unchanged,
    /// Rewritten, uncompressed body. `Content-Encoding` must be dropped and
    /// `Content-Length` set to the new length.
    Rewritten(Vec<u8>),
}

impl Outcome {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Outcome::Unchanged)
    }
}

pub struct Pipeline {
    engine: RuleEngine,
}

impl Pipeline {
    pub fn new(engine: RuleEngine) -> Self {
        Self { engine }
    }

    pub fn from_rules(rules: Vec<EnrichmentRule>, registry: Arc<SourceRegistry>) -> Self {
        Self::new(RuleEngine::new(rules, registry))
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Processes one upstream response body.
    ///
    /// `content_encoding` is the upstream `Content-Encoding` header value,
    /// `query` the query expression captured from the originating request.
    pub fn process(
        &self,
        raw: &[u8],
        content_encoding: Option<&str>,
        query: &str,
    ) -> Result<Outcome, PipelineError> {
        let t0 = Instant::now();

        let Some(body) = decode_body(raw, content_encoding) else {
            return Ok(Outcome::Unchanged);
        };

        let mut result: QueryResult = match serde_json::from_slice(&body) {
            Ok(result) => result,
            Err(e) => {
                debug!(error = %e, "response is not a query result, passing through");
                return Ok(Outcome::Unchanged);
            }
        };

        if !self.engine.is_applicable(query, &result) {
            return Ok(Outcome::Unchanged);
        }

        let series_in = result.data.result.len();
        let stats = self.engine.apply(&mut result, query);
        let labels = self.engine.tracked_labels(query);
        let result = aggregate::regroup(result, &labels);

        let out = serde_json::to_vec(&result).map_err(PipelineError::Serialize)?;
        debug!(
            query,
            result_type = %result.data.result_type,
            series_in,
            series_out = result.data.result.len(),
            matched = stats.matched,
            fallback = stats.fallback,
            rules_skipped = stats.rules_skipped,
            duration_us = t0.elapsed().as_micros() as u64,
            "response enriched"
        );
        Ok(Outcome::Rewritten(out))
    }
}

/// Returns the plain body, or `None` when it cannot be decoded: an encoding
/// we do not handle, or a corrupt gzip stream.
fn decode_body<'a>(raw: &'a [u8], content_encoding: Option<&str>) -> Option<Cow<'a, [u8]>> {
    let encoding = content_encoding
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match encoding.as_str() {
        "" | "identity" => Some(Cow::Borrowed(raw)),
        "gzip" | "x-gzip" => {
            let mut out = Vec::with_capacity(raw.len() * 4);
            match GzDecoder::new(raw).read_to_end(&mut out) {
                Ok(_) => Some(Cow::Owned(out)),
                Err(e) => {
                    debug!(error = %e, "gzip decode failed, passing through");
                    None
                }
            }
        }
        other => {
            debug!(encoding = other, "unsupported content encoding, passing through");
            None
        }
    }
}
