//! Gauge Store
//!
//! Holds the last successfully fetched counters as Prometheus gauges in a
//! registry owned by the store.

use crate::error::Result;
use crate::metrics::fetcher::MetricsSnapshot;
use parking_lot::RwLock;
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder, TEXT_FORMAT};

/// Exported gauge names
pub const REQUESTS_GAUGE: &str = "http_requests_total";
pub const RESPONSES_400_GAUGE: &str = "http_400_response_total";
pub const RESPONSES_500_GAUGE: &str = "http_500_response_total";

/// Plain copy of the current gauge values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GaugeValues {
    pub request_count: f64,
    pub count_400: f64,
    pub count_500: f64,
}

/// Shared gauge state read by the export server and written by the refresh loop
pub struct GaugeStore {
    registry: Registry,
    requests: Gauge,
    responses_400: Gauge,
    responses_500: Gauge,
    /// Held for writing across one `apply`, for reading across one `encode`
    update: RwLock<()>,
}

impl GaugeStore {
    /// Create a store with all three gauges registered and set to zero
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = Gauge::with_opts(Opts::new(
            REQUESTS_GAUGE,
            "The total number of http requests",
        ))?;
        let responses_400 = Gauge::with_opts(Opts::new(
            RESPONSES_400_GAUGE,
            "The total number of http response code 400",
        ))?;
        let responses_500 = Gauge::with_opts(Opts::new(
            RESPONSES_500_GAUGE,
            "The total number of http response code 500",
        ))?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(responses_400.clone()))?;
        registry.register(Box::new(responses_500.clone()))?;

        Ok(Self {
            registry,
            requests,
            responses_400,
            responses_500,
            update: RwLock::new(()),
        })
    }

    /// Overwrite all three gauges from one snapshot
    pub fn apply(&self, snapshot: &MetricsSnapshot) {
        let _guard = self.update.write();
        self.requests.set(snapshot.request_count as f64);
        self.responses_400.set(snapshot.count_400 as f64);
        self.responses_500.set(snapshot.count_500 as f64);
    }

    /// Current gauge values
    pub fn values(&self) -> GaugeValues {
        let _guard = self.update.read();
        GaugeValues {
            request_count: self.requests.get(),
            count_400: self.responses_400.get(),
            count_500: self.responses_500.get(),
        }
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = {
            let _guard = self.update.read();
            self.registry.gather()
        };

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    /// Content-Type header value matching [`GaugeStore::encode`]
    pub fn content_type(&self) -> &'static str {
        TEXT_FORMAT
    }
}

impl std::fmt::Debug for GaugeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeStore")
            .field("values", &self.values())
            .finish()
    }
}
