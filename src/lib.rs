//! Upstream Exporter
//!
//! Polls an upstream service for its request counters and re-exposes them
//! as Prometheus gauges.
//!
//! # Architecture
//!
//! ```text
//! Upstream /metrics (JSON) → Fetcher → Refresher → GaugeStore → Metrics Server (/metrics)
//! ```
//!
//! # Modules
//!
//! - [`error`] - Error types
//! - [`metrics`] - Upstream fetcher, refresh loop and gauge store
//! - [`server`] - Prometheus scrape endpoint

pub mod error;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use error::{Error, Result};
pub use metrics::{Fetcher, GaugeStore, MetricsSnapshot, Refresher};
