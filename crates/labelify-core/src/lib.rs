//! labelify-core — response enrichment for a metrics query proxy.
//!
//! Provides:
//! - `config` — configuration document (sources, rules, upstream)
//! - `model` — query response envelope (vector / matrix results)
//! - `source` — mapping sources (static, polling) and their registry
//! - `rules` — rule matching engine that attaches labels to series
//! - `aggregate` — regrouping of enriched series by the added labels
//! - `pipeline` — decompress → parse → enrich → aggregate → serialize
//! - `util` — helper utilities

pub mod aggregate;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod rules;
pub mod source;
pub mod util;

pub use config::Config;
pub use error::{ConfigError, PipelineError, SourceError};
pub use pipeline::{Outcome, Pipeline};

/// Crate version, shared by the binaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
