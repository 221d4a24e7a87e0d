//! Mappings fetched from a remote endpoint and refreshed in the background.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{MappingSource, SourceSnapshot};
use crate::config::{SourceConfig, SourceData};
use crate::error::{ConfigError, SourceError};
use crate::util::parse_duration;

/// Outbound fetch timeout when the source does not set one.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote mapping source.
///
/// Readers take the read lock only long enough to clone the current
/// `Arc<SourceSnapshot>`. The refresh task builds the next snapshot outside
/// the lock and swaps it in under the write lock.
pub struct PollingSource {
    inner: Arc<PollingInner>,
    refresh_task: Option<JoinHandle<()>>,
}

struct PollingInner {
    name: String,
    url: String,
    method: Result<Method, String>,
    headers: HeaderMap,
    client: reqwest::Client,
    snapshot: RwLock<Arc<SourceSnapshot>>,
}

impl PollingSource {
    /// Builds the source and performs the initial fetch.
    ///
    /// A failed initial fetch is logged and the source starts empty. When a
    /// valid refresh interval is configured a refresh task is spawned; it
    /// stops when `shutdown` fires or its sender is dropped.
    pub async fn start(
        config: &SourceConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self, ConfigError> {
        let name = config.name.clone();
        let http = &config.config;

        let timeout = if http.timeout.trim().is_empty() {
            DEFAULT_FETCH_TIMEOUT
        } else {
            parse_duration(&http.timeout).unwrap_or_else(|e| {
                warn!(source = %name, error = %e, "invalid timeout, using default");
                DEFAULT_FETCH_TIMEOUT
            })
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ConfigError::Client {
                name: name.clone(),
                source,
            })?;

        let method = if http.method.trim().is_empty() {
            Ok(Method::GET)
        } else {
            Method::from_bytes(http.method.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                warn!(source = %name, method = %http.method, "invalid http method, fetches will fail");
                http.method.clone()
            })
        };

        let inner = Arc::new(PollingInner {
            name: name.clone(),
            url: http.url.clone(),
            method,
            headers: build_headers(&name, &http.headers),
            client,
            snapshot: RwLock::new(Arc::new(SourceSnapshot::empty())),
        });

        match inner.refresh().await {
            Ok(count) => info!(source = %name, mappings = count, "initial mappings loaded"),
            Err(e) => warn!(source = %name, error = %e, "failed to load initial mappings, starting empty"),
        }

        let refresh_task = if http.refresh_interval.trim().is_empty() {
            None
        } else {
            match parse_duration(&http.refresh_interval) {
                Ok(interval) if !interval.is_zero() => {
                    let inner = inner.clone();
                    Some(tokio::spawn(refresh_loop(inner, interval, shutdown)))
                }
                Ok(_) => {
                    warn!(source = %name, "zero refresh interval, refresh disabled");
                    None
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "invalid refresh interval, refresh disabled");
                    None
                }
            }
        };

        Ok(Self {
            inner,
            refresh_task,
        })
    }

    /// Fetches now and swaps the snapshot on success.
    pub async fn refresh_now(&self) -> Result<usize, SourceError> {
        self.inner.refresh().await
    }

    /// Returns `true` while the background refresh task is running.
    pub fn is_refreshing(&self) -> bool {
        self.refresh_task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }
}

impl MappingSource for PollingSource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn mappings(&self) -> Result<Arc<SourceSnapshot>, SourceError> {
        Ok(self.inner.current())
    }
}

impl PollingInner {
    fn current(&self) -> Arc<SourceSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn fetch(&self) -> Result<BTreeMap<String, SourceData>, SourceError> {
        let method = self.method.clone().map_err(SourceError::Method)?;

        let response = self
            .client
            .request(method, &self.url)
            .headers(self.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SourceError::Status(status));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn refresh(&self) -> Result<usize, SourceError> {
        let mappings = self.fetch().await?;
        let next = Arc::new(SourceSnapshot::new(&self.name, mappings));
        let count = next.len();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(count)
    }
}

async fn refresh_loop(
    inner: Arc<PollingInner>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately; the initial fetch already ran.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.recv() => {
                debug!(source = %inner.name, "refresh task stopped");
                return;
            }
        }

        let t0 = Instant::now();
        match inner.refresh().await {
            Ok(count) => debug!(
                source = %inner.name,
                mappings = count,
                duration_ms = t0.elapsed().as_millis() as u64,
                "mappings refreshed"
            ),
            Err(e) => warn!(
                source = %inner.name,
                error = %e,
                duration_ms = t0.elapsed().as_millis() as u64,
                "refresh failed, keeping previous mappings"
            ),
        }
    }
}

fn build_headers(source: &str, headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(k), Ok(v)) => {
                map.insert(k, v);
            }
            _ => warn!(source, header = %key, "invalid header, skipped"),
        }
    }
    map
}
