//! Upstream Exporter
//!
//! Re-exposes an upstream service's request counters as Prometheus gauges.
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │   Fetcher    │───▶│  GaugeStore  │◀───│   Metrics    │
//! │  (Refresher) │    │              │    │   Server     │
//! └──────────────┘    └──────────────┘    └──────────────┘
//! ```

use clap::builder::FalseyValueParser;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use upstream_exporter::error::{Error, Result};
use upstream_exporter::metrics::{Fetcher, FetcherConfig, GaugeStore, RefreshConfig, Refresher};
use upstream_exporter::server;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Upstream Exporter - Prometheus gauges for an upstream service's counters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the upstream service (`/metrics` is appended)
    #[arg(long, env = "MAIN_APP_URL")]
    main_app_url: String,

    /// Metrics server bind address
    #[arg(long, env = "LISTEN_ADDR", default_value = server::DEFAULT_LISTEN_ADDR)]
    listen_addr: String,

    /// Wait between refreshes in milliseconds
    #[arg(long, env = "REFRESH_INTERVAL_MS", default_value = "2000")]
    refresh_interval_ms: u64,

    /// Upstream request timeout in milliseconds
    #[arg(long, env = "FETCH_TIMEOUT_MS", default_value = "5000")]
    fetch_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON (`LOG_JSON=1`, `yes`, `on` and `true` all enable it)
    #[arg(long, env = "LOG_JSON", value_parser = FalseyValueParser::new())]
    log_json: bool,
}

impl Args {
    fn validate(&self) -> Result<()> {
        if self.main_app_url.trim().is_empty() {
            return Err(Error::Config("MAIN_APP_URL must not be empty".into()));
        }
        if self.refresh_interval_ms == 0 {
            return Err(Error::Config("refresh interval must be positive".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(Error::Config("fetch timeout must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);
    args.validate()?;

    info!("Starting Upstream Exporter");
    info!("  Upstream URL: {}", args.main_app_url);
    info!("  Refresh interval: {} ms", args.refresh_interval_ms);

    let store = Arc::new(GaugeStore::new()?);

    let fetcher = Fetcher::new(FetcherConfig {
        timeout: Duration::from_millis(args.fetch_timeout_ms),
    })?;
    info!("  Fetch timeout: {:?}", fetcher.timeout());

    let refresher = Refresher::new(
        RefreshConfig {
            base_url: args.main_app_url.clone(),
            interval: Duration::from_millis(args.refresh_interval_ms),
        },
        Arc::new(fetcher),
        Arc::clone(&store),
    );

    // Bind failure is fatal
    let listener = server::bind(&args.listen_addr).await.map_err(|e| {
        error!("{}", e);
        e
    })?;

    let cancel = CancellationToken::new();

    let refresh_handle = tokio::spawn(refresher.run(cancel.child_token()));
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    server::serve(listener, store, cancel.clone()).await?;

    cancel.cancel();
    if let Err(e) = refresh_handle.await {
        error!("Refresh loop task failed: {}", e);
    }

    info!("Exporter shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Shutdown
// =============================================================================

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["upstream-exporter", "--main-app-url", "http://app:8080"]);

        assert_eq!(args.listen_addr, "0.0.0.0:2112");
        assert_eq!(args.refresh_interval_ms, 2000);
        assert_eq!(args.fetch_timeout_ms, 5000);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_log_json_accepts_numeric_env() {
        std::env::set_var("LOG_JSON", "1");
        let enabled = Args::try_parse_from(["upstream-exporter", "--main-app-url", "http://app:8080"]);
        std::env::set_var("LOG_JSON", "0");
        let disabled = Args::try_parse_from(["upstream-exporter", "--main-app-url", "http://app:8080"]);
        std::env::remove_var("LOG_JSON");

        assert!(enabled.unwrap().log_json);
        assert!(!disabled.unwrap().log_json);
    }

    #[test]
    fn test_log_json_flag() {
        let args = Args::parse_from([
            "upstream-exporter",
            "--main-app-url",
            "http://app:8080",
            "--log-json",
        ]);
        assert!(args.log_json);
    }

    #[test]
    fn test_args_reject_empty_url() {
        let args = Args::parse_from(["upstream-exporter", "--main-app-url", " "]);
        assert!(matches!(args.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_args_reject_zero_interval() {
        let args = Args::parse_from([
            "upstream-exporter",
            "--main-app-url",
            "http://app:8080",
            "--refresh-interval-ms",
            "0",
        ]);
        assert!(matches!(args.validate(), Err(Error::Config(_))));
    }
}
