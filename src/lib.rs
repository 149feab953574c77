//! VN market data pipeline — real-time ingestion, per-symbol analytics, and
//! WebSocket fan-out over a Vietnamese equity/derivatives feed.
//!
//! `AppState` and `serve()` live here rather than in `main.rs` so the HTTP/WS
//! handlers (which reach it via `crate::AppState`) and the `tests/`
//! integration suite can both link against the same wired-up core.

pub mod analytics;
pub mod api;
pub mod config;
pub mod ingest;
pub mod market;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod processor;
pub mod scheduler;
pub mod storage;
pub mod stream;
pub mod ws;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::processor::{PersistRecord, Processor, PublishSignal};
use crate::scheduler::daily_reset::DailyResetScheduler;
use crate::storage::batch_writer::BatchWriter;
use crate::storage::db::Db;
use crate::stream::auth::AuthClient;
use crate::stream::supervisor::StreamSupervisor;
use crate::ws::connection_manager::ChannelManagers;
use crate::ws::publisher::Publisher;
use crate::ws::routes::IpConnectionTracker;

/// Shared application state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub processor: Arc<Mutex<Processor>>,
    pub managers: ChannelManagers,
    pub ip_connections: Arc<IpConnectionTracker>,
    pub db: Option<Arc<Db>>,
    pub upstream_connected: Arc<AtomicBool>,
    pub metrics_handle: Arc<PrometheusHandle>,
}

fn watchlist_from(config: &Config) -> HashSet<String> {
    config.extra_symbols.iter().cloned().collect()
}

fn build_router(state: AppState) -> Router {
    let cors = if state.config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    let history_limiter = middleware::rate_limit::RateLimitLayer::new(
        middleware::rate_limit::RateLimitConfig::default(),
    );
    let history_routes: Router<AppState> = Router::new()
        .route("/api/history/ticks", get(api::routes::tick_history))
        .route("/api/history/candles", get(api::routes::candle_history))
        .route("/api/history/foreign", get(api::routes::foreign_history))
        .route_layer(axum::middleware::from_fn_with_state(
            history_limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));

    Router::new()
        .route("/ws/market", get(ws::routes::market_ws))
        .route("/ws/foreign", get(ws::routes::foreign_ws))
        .route("/ws/index", get(ws::routes::index_ws))
        .route("/ws/alerts", get(ws::routes::alerts_ws))
        .route("/health", get(api::routes::health))
        .route("/metrics", get(api::routes::metrics_endpoint))
        .merge(history_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_simple,
        ))
        .with_state(state)
}

/// Wires every component described in SPEC_FULL.md and serves until the
/// process is killed. Returns an error only for unrecoverable startup
/// failures (missing broker credentials); transient failures downstream
/// (database, upstream connectivity) degrade gracefully instead.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    if !config.has_broker_credentials() {
        anyhow::bail!("BROKER_CONSUMER_ID / BROKER_CONSUMER_SECRET are required at startup");
    }

    let metrics_handle = Arc::new(
        metrics::install().map_err(|err| anyhow::anyhow!("failed to install metrics recorder: {err}"))?,
    );

    let db = match Db::open(&config.database_path) {
        Ok(db) => Some(Arc::new(db)),
        Err(err) => {
            warn!(%err, "database unavailable at startup, running without persistence");
            None
        }
    };

    let (notify_tx, notify_rx) = tokio::sync::mpsc::unbounded_channel::<PublishSignal>();
    let (persist_tx, persist_rx) = tokio::sync::mpsc::unbounded_channel::<PersistRecord>();

    let watchlist = watchlist_from(&config);
    let processor = Arc::new(Mutex::new(Processor::new(watchlist, notify_tx, persist_tx)));
    let managers = ChannelManagers::with_capacity_and_timeout(
        config.ws_queue_size,
        Duration::from_secs(config.ws_heartbeat_timeout_secs),
    );
    let upstream_connected = Arc::new(AtomicBool::new(false));

    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        processor: processor.clone(),
        managers: managers.clone(),
        ip_connections: Arc::new(IpConnectionTracker::new()),
        db: db.clone(),
        upstream_connected: upstream_connected.clone(),
        metrics_handle,
    };

    if let Some(db) = db {
        let writer = Arc::new(BatchWriter::new(db.conn(), Duration::from_secs(1)));
        tokio::spawn(writer.run(persist_rx));
    } else {
        // no persistence: drain persist_rx so senders never block on a full
        // channel with nobody on the other end.
        tokio::spawn(async move {
            let mut persist_rx = persist_rx;
            while persist_rx.recv().await.is_some() {}
        });
    }

    let publisher = Publisher::new(
        processor.clone(),
        &managers,
        Duration::from_millis(config.ws_throttle_interval_ms),
    );
    tokio::spawn(publisher.run(notify_rx));

    let scheduler = DailyResetScheduler::new(
        processor.clone(),
        config.reset_hour,
        config.reset_minute,
        &config.reset_tz,
    )?;
    tokio::spawn(async move { scheduler.run().await });

    let auth = AuthClient::new(
        config.broker_base_url.clone(),
        config.broker_consumer_id.clone(),
        config.broker_consumer_secret.clone(),
    );
    let supervisor = StreamSupervisor::new(
        auth,
        config.broker_stream_url.clone(),
        processor.clone(),
        managers.clone(),
        upstream_connected,
    );
    tokio::spawn(async move { supervisor.run().await });

    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.app_host, config.app_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "vn-market-pipeline listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
