//! Metrics module
//!
//! Fetches upstream counters and keeps them as exportable gauges.

mod fetcher;
mod refresh;
mod store;

pub use fetcher::{Fetcher, FetcherConfig, MetricsSnapshot, SnapshotSource, DEFAULT_FETCH_TIMEOUT};
pub use refresh::{RefreshConfig, Refresher, DEFAULT_REFRESH_INTERVAL, UPSTREAM_METRICS_PATH};
pub use store::{
    GaugeStore, GaugeValues, REQUESTS_GAUGE, RESPONSES_400_GAUGE, RESPONSES_500_GAUGE,
};
