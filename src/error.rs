//! Error types for the upstream exporter

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the upstream exporter
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Fetch Errors
    // =========================================================================
    /// The upstream request could not be built (malformed URL)
    #[error("Failed to create GET request: {0}")]
    RequestConstruction(#[source] reqwest::Error),

    /// Network failure or timeout while talking to the upstream
    #[error("Failed to send GET request: {0}")]
    Transport(#[source] reqwest::Error),

    /// Upstream answered with something other than 200 OK
    #[error("Invalid response status code {status}")]
    UnexpectedStatus { status: u16 },

    /// Upstream response body could not be read
    #[error("Failed to read response body: {0}")]
    BodyRead(#[source] reqwest::Error),

    /// Upstream response body is not the expected JSON shape
    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    // =========================================================================
    // Export Errors
    // =========================================================================
    /// Prometheus registry or encoder error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The export listener could not be bound
    #[error("Failed to bind metrics server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when the upstream did not answer within the fetch timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Transport(e) | Error::BodyRead(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Short machine-friendly label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::RequestConstruction(_) => "request_construction",
            Error::Transport(_) => "transport",
            Error::UnexpectedStatus { .. } => "unexpected_status",
            Error::BodyRead(_) => "body_read",
            Error::Decode(_) => "decode",
            Error::Metrics(_) => "metrics",
            Error::Bind { .. } => "bind",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
        }
    }
}
