//! Refresh Loop
//!
//! Periodically pulls a snapshot from the upstream and publishes it to the
//! gauge store. Failures are logged and retried at the same cadence.

use crate::error::Result;
use crate::metrics::fetcher::{MetricsSnapshot, SnapshotSource};
use crate::metrics::store::GaugeStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default wait between two refresh iterations.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Path appended to the upstream base URL.
pub const UPSTREAM_METRICS_PATH: &str = "/metrics";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Base URL of the upstream service
    pub base_url: String,

    /// Fixed wait after every iteration, successful or not
    pub interval: Duration,
}

impl RefreshConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// Full URL of the upstream metrics endpoint
    pub fn metrics_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            UPSTREAM_METRICS_PATH
        )
    }
}

// =============================================================================
// Refresher
// =============================================================================

/// Drives the fetch → store cycle
pub struct Refresher {
    config: RefreshConfig,
    url: String,
    source: Arc<dyn SnapshotSource>,
    store: Arc<GaugeStore>,
    consecutive_failures: AtomicU64,
}

impl Refresher {
    /// Create a new refresher
    pub fn new(
        config: RefreshConfig,
        source: Arc<dyn SnapshotSource>,
        store: Arc<GaugeStore>,
    ) -> Arc<Self> {
        let url = config.metrics_url();

        Arc::new(Self {
            config,
            url,
            source,
            store,
            consecutive_failures: AtomicU64::new(0),
        })
    }

    /// URL polled on every iteration
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of failed iterations since the last success
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Run one iteration: fetch, then publish on success.
    ///
    /// The store is left untouched when the fetch fails.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn refresh_once(&self) -> Result<MetricsSnapshot> {
        match self.source.fetch(&self.url).await {
            Ok(snapshot) => {
                self.store.apply(&snapshot);

                let previous_failures = self.consecutive_failures.swap(0, Ordering::Relaxed);
                if previous_failures > 0 {
                    info!(
                        failures = previous_failures,
                        "Upstream metrics fetch recovered"
                    );
                }
                debug!("Gauges updated from upstream snapshot");

                Ok(snapshot)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    error = %e,
                    kind = e.kind(),
                    timeout = e.is_timeout(),
                    consecutive_failures = failures,
                    "Failed to fetch upstream metrics"
                );

                Err(e)
            }
        }
    }

    /// Run the refresh loop until `cancel` fires
    #[instrument(skip(self, cancel))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Starting refresh loop for {} every {:?}",
            self.url(),
            self.config.interval
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.refresh_once() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("Refresh loop shutting down");
    }
}

impl std::fmt::Debug for Refresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresher")
            .field("url", &self.url)
            .field("interval", &self.config.interval)
            .finish()
    }
}
