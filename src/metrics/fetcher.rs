//! Upstream Fetcher
//!
//! Pulls the request counters from the upstream service's JSON
//! metrics endpoint with a bounded timeout.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default client-side timeout for one upstream request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the upstream fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Request timeout, covering connect, send and body read
    pub timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

// =============================================================================
// Metrics Snapshot
// =============================================================================

/// One set of counters decoded from a single upstream response.
///
/// The serde names are the upstream wire contract. Fields missing from the
/// body decode as zero; unknown fields are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total number of requests served by the upstream
    #[serde(rename = "request_count", default)]
    pub request_count: u64,

    /// Number of 400 responses
    #[serde(rename = "400_count", default)]
    pub count_400: u64,

    /// Number of 500 responses
    #[serde(rename = "500_count", default)]
    pub count_500: u64,
}

impl MetricsSnapshot {
    pub fn new(request_count: u64, count_400: u64, count_500: u64) -> Self {
        Self {
            request_count,
            count_400,
            count_500,
        }
    }

    /// Decode a snapshot from a raw response body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

// =============================================================================
// Snapshot Source
// =============================================================================

/// Anything that can produce a snapshot for a URL.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch one snapshot. Must not retry.
    async fn fetch(&self, url: &str) -> Result<MetricsSnapshot>;
}

// =============================================================================
// Fetcher
// =============================================================================

/// HTTP fetcher for the upstream metrics endpoint
pub struct Fetcher {
    config: FetcherConfig,
    client: Client,
}

impl Fetcher {
    /// Create a new fetcher
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Configured request timeout
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

#[async_trait]
impl SnapshotSource for Fetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<MetricsSnapshot> {
        let request = self
            .client
            .get(url)
            .build()
            .map_err(Error::RequestConstruction)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(Error::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(Error::BodyRead)?;
        let snapshot = MetricsSnapshot::from_slice(&body)?;

        debug!(
            request_count = snapshot.request_count,
            count_400 = snapshot.count_400,
            count_500 = snapshot.count_500,
            "Fetched upstream snapshot"
        );

        Ok(snapshot)
    }
}
