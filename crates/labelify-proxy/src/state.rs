//! Shared proxy state and global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::State;
use reqwest::Url;

use labelify_core::{ConfigError, Pipeline};

pub(crate) struct ProxyState {
    pub(crate) upstream: Url,
    pub(crate) client: reqwest::Client,
    pub(crate) pipeline: Arc<Pipeline>,
    // Empty: every path is enriched.
    pub(crate) enrich_paths: HashSet<String>,
}

pub(crate) type SharedState = Arc<ProxyState>;

pub(crate) type AppState = State<SharedState>;

impl ProxyState {
    pub(crate) fn new(
        upstream: &str,
        enrich_paths: &[String],
        pipeline: Pipeline,
    ) -> Result<Self, ConfigError> {
        let upstream = Url::parse(upstream.trim()).map_err(|e| ConfigError::InvalidUpstream {
            url: upstream.to_string(),
            reason: e.to_string(),
        })?;

        // Redirects and compression are the client's business, not ours.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|source| ConfigError::Client {
                name: "upstream".to_string(),
                source,
            })?;

        Ok(Self {
            upstream,
            client,
            pipeline: Arc::new(pipeline),
            enrich_paths: enrich_paths.iter().cloned().collect(),
        })
    }

    pub(crate) fn should_enrich(&self, path: &str) -> bool {
        self.enrich_paths.is_empty() || self.enrich_paths.contains(path)
    }

    /// Upstream URL for a proxied request: base path joined with the request
    /// path, original query string kept verbatim.
    pub(crate) fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.upstream.clone();
        let base = url.path().trim_end_matches('/');
        let joined = format!("{base}{path}");
        url.set_path(&joined);
        url.set_query(query);
        url
    }
}
