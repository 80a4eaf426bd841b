//! Qrawler Feed Binary
//!
//! Opens the configured subscriptions against the Qrawler provider and logs
//! what they deliver, serving health and metrics alongside.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin qrawler-feed
//! ```
//!
//! # Environment Variables
//!
//! - `QRAWLER_CONFIG`: Path to the YAML config (default: config.yaml)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: qrawler-feed)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use qrawler_feed::infrastructure::config::{Config, load_config};
use qrawler_feed::infrastructure::health::{HealthServer, HealthServerState};
use qrawler_feed::infrastructure::qrawler::{
    HistoricalClientConfig, LiveClientConfig, QrawlerHistoricalClient, QrawlerLiveClient,
    ReconnectConfig,
};
use qrawler_feed::infrastructure::telemetry;
use qrawler_feed::{DataFeed, FeedCollaborators, Subscription, SymbolTranslator, init_metrics};
use tokio::runtime::Handle;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to wait for subscription drains after exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Qrawler feed");

    let _metrics_handle = init_metrics();

    let config = load_config(None).context("loading configuration")?;
    log_config(&config);

    let feed = Arc::new(build_feed(&config)?);
    let shutdown_token = CancellationToken::new();

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION"),
        Arc::clone(&feed),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let drains = open_startup_subscriptions(&config, &feed)?;
    tracing::info!(subscriptions = drains.len(), "Qrawler feed ready");

    await_shutdown(shutdown_token).await;

    feed.exit();
    let drained =
        tokio::time::timeout(SHUTDOWN_TIMEOUT, futures_util::future::join_all(drains)).await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Subscription drains did not finish in time"
        );
    }

    tracing::info!("Qrawler feed stopped");
    Ok(())
}

/// Wire the provider adapters into a data feed.
fn build_feed(config: &Config) -> anyhow::Result<DataFeed> {
    let runtime = Handle::current();
    let translator = SymbolTranslator::new(Arc::new(config.feed_map()?));

    let live_config = LiveClientConfig::new(config.qrawler.url_live.as_str())
        .with_reconnect(ReconnectConfig::from(&config.live.reconnect))
        .with_buffer_capacity(config.live.buffer_capacity);
    let live = QrawlerLiveClient::new(live_config, runtime.clone());

    let mut historical_config = HistoricalClientConfig::new(config.qrawler.url_historical.as_str());
    if let Some(timeout) = config.qrawler.historical_timeout() {
        historical_config = historical_config.with_timeout(timeout);
    }
    let historical = QrawlerHistoricalClient::new(&historical_config, runtime.clone())?;

    let collaborators = FeedCollaborators::new(Arc::new(live), Arc::new(historical));

    Ok(DataFeed::new(
        translator,
        collaborators,
        config.live.poll_interval(),
        runtime,
    )
    .with_queue_capacity(config.live.queue_capacity))
}

/// Open every configured subscription and drain it on a blocking thread.
fn open_startup_subscriptions(
    config: &Config,
    feed: &DataFeed,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let hours = config.qrawler.market_hours();
    let data_time_zone = config.data_time_zone()?;

    let mut drains = Vec::with_capacity(config.subscriptions.len());
    for settings in &config.subscriptions {
        let request = settings.to_request(&hours, data_time_zone);
        match feed.create_subscription(request) {
            Ok(Some(subscription)) => {
                drains.push(tokio::task::spawn_blocking(move || drain(subscription)));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(symbol = %settings.symbol, error = %e, "Subscription rejected");
            }
        }
    }
    Ok(drains)
}

/// Pull a subscription to its end, logging each item.
fn drain(subscription: Subscription) {
    let id = subscription.id();
    let symbol = subscription.request().symbol.clone();
    let mut delivered = 0_u64;
    let mut failed = 0_u64;

    for item in subscription {
        match item {
            Ok(point) => {
                delivered += 1;
                tracing::debug!(
                    subscription_id = %id,
                    end_time = %point.end_time_utc(),
                    fill_forward = point.is_fill_forward(),
                    "Data point"
                );
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(subscription_id = %id, error = %e, "Subscription error");
            }
        }
    }

    tracing::info!(
        subscription_id = %id,
        symbol = %symbol,
        delivered,
        failed,
        "Subscription finished"
    );
}

/// Log the parsed configuration.
fn log_config(config: &Config) {
    tracing::info!(
        url_live = %config.qrawler.url_live,
        url_historical = %config.qrawler.url_historical,
        feeds = config.qrawler.feed_map.len(),
        subscriptions = config.subscriptions.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
