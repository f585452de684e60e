//! Gateway service entry point.
//!
//! Wires the fabric, telemetry store, job queues and HTTP surface together
//! and runs until ctrl-c / SIGTERM.

use anyhow::Result;
use common::{LogNotifier, NoopSearch, RouteRepository, RouteStop, StaticRoutes, StationInfo};
use fabric::{Fabric, RedisTransport};
use gateway::{
    create_router, AppState, DataSyncProcessor, LiveGateway, LiveGatewayConfig,
    NotificationDispatchProcessor, PositionPollProcessor, StatusRefreshProcessor,
};
use jobs::{JobPayload, QueueName, QueueService, QueueServiceConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telemetry::{HttpEventStore, TelemetryStore};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting live update gateway");

    // Read configuration from environment
    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let telemetry_url =
        env::var("TELEMETRY_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let telemetry_user = env::var("TELEMETRY_USER").unwrap_or_else(|_| "admin".to_string());
    let telemetry_password = env::var("TELEMETRY_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9090".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let train_poll_secs: u64 = env::var("TRAIN_POLL_SECS")
        .unwrap_or_else(|_| "30".to_string())
        .parse()
        .expect("TRAIN_POLL_SECS must be a number");
    let station_poll_secs: u64 = env::var("STATION_POLL_SECS")
        .unwrap_or_else(|_| "60".to_string())
        .parse()
        .expect("STATION_POLL_SECS must be a number");

    info!("Configuration:");
    info!("  REDIS_URL: {}", redis_url);
    info!("  TELEMETRY_URL: {}", telemetry_url);
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  TRAIN_POLL_SECS: {}", train_poll_secs);
    info!("  STATION_POLL_SECS: {}", station_poll_secs);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    // Cache / pub-sub fabric over Redis. The connection itself is lazy, so
    // a Redis outage at boot degrades instead of failing startup.
    let (transport, inbound_rx) = RedisTransport::connect(&redis_url)?;
    let fabric = Arc::new(Fabric::new(transport, inbound_rx));

    // Telemetry store
    let event_store = Arc::new(HttpEventStore::new(
        &telemetry_url,
        &telemetry_user,
        &telemetry_password,
    ));
    let live = event_store.check_liveness().await;
    let telemetry = TelemetryStore::new(event_store);
    if !live {
        warn!("telemetry backend not reachable at {}, continuing degraded", telemetry_url);
        telemetry.log_app("warn", "telemetry unreachable", "startup").await;
    }
    telemetry.ensure_streams().await;

    // Static route facts. Real deployments hydrate these from the rail data
    // service; the built-in table keeps the gateway useful standalone.
    let routes = Arc::new(seed_routes());

    // Job queues and processors
    let queue = QueueService::new(QueueServiceConfig::default());
    queue.register_worker(
        QueueName::PositionPoll,
        PositionPollProcessor::new(fabric.clone(), telemetry.clone()),
    );
    queue.register_worker(
        QueueName::StatusRefresh,
        StatusRefreshProcessor::new(fabric.clone(), telemetry.clone()),
    );
    queue.register_worker(
        QueueName::NotificationDispatch,
        NotificationDispatchProcessor::new(Arc::new(LogNotifier::default())),
    );
    queue.register_worker(
        QueueName::DataSync,
        DataSyncProcessor::new(Arc::new(NoopSearch)),
    );

    // Hourly search re-index, plus a poll loop per tracked train.
    queue.add_repeating(
        QueueName::DataSync,
        "hourly-data-sync",
        JobPayload::DataSync {
            scope: "all".to_string(),
        },
        Duration::from_secs(3600),
    );
    for train_number in routes.train_numbers() {
        let payload = JobPayload::PositionPoll {
            train_number: train_number.clone(),
        };
        // Warm the cache now, then keep it fresh.
        if let Err(err) = queue.add_job(
            QueueName::PositionPoll,
            format!("poll-{train_number}"),
            payload.clone(),
            Default::default(),
        ) {
            warn!(train = %train_number, "initial poll enqueue failed: {err}");
        }
        queue.add_repeating(
            QueueName::PositionPoll,
            format!("poll-{train_number}"),
            payload,
            Duration::from_secs(train_poll_secs),
        );
    }

    // Live gateway
    let gateway = LiveGateway::new(
        fabric.clone(),
        telemetry.clone(),
        routes as Arc<dyn RouteRepository>,
        LiveGatewayConfig {
            train_poll: Duration::from_secs(train_poll_secs),
            station_poll: Duration::from_secs(station_poll_secs),
            ..LiveGatewayConfig::default()
        },
    );

    // Create application state and HTTP router
    let state = Arc::new(AppState {
        gateway,
        fabric,
        telemetry: telemetry.clone(),
    });
    let app = create_router(state);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);
    telemetry
        .log_system_event(
            "rail-live",
            "startup",
            serde_json::json!({ "http_port": http_port, "metrics_port": metrics_port }),
        )
        .await;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain the queues before exiting
    info!("Shutting down queue service...");
    queue.shutdown(Duration::from_secs(30)).await;

    telemetry
        .log_system_event("rail-live", "shutdown", serde_json::json!({}))
        .await;
    info!("Gateway stopped");
    Ok(())
}

/// Built-in route table used when no rail data service is configured.
fn seed_routes() -> StaticRoutes {
    fn stop(n: u32, code: &str, name: &str, lat: f64, lon: f64) -> RouteStop {
        RouteStop {
            stop_number: n,
            station_code: code.to_string(),
            station_name: name.to_string(),
            latitude: lat,
            longitude: lon,
        }
    }

    StaticRoutes::new()
        .with_train(
            "12951",
            vec![
                stop(1, "NDLS", "New Delhi", 28.6436, 77.2196),
                stop(2, "KOTA", "Kota Jn", 25.1790, 75.8480),
                stop(3, "RTM", "Ratlam Jn", 23.3315, 75.0367),
                stop(4, "BRC", "Vadodara Jn", 22.3100, 73.1810),
                stop(5, "MMCT", "Mumbai Central", 18.9696, 72.8195),
            ],
        )
        .with_train(
            "12952",
            vec![
                stop(1, "MMCT", "Mumbai Central", 18.9696, 72.8195),
                stop(2, "BRC", "Vadodara Jn", 22.3100, 73.1810),
                stop(3, "RTM", "Ratlam Jn", 23.3315, 75.0367),
                stop(4, "KOTA", "Kota Jn", 25.1790, 75.8480),
                stop(5, "NDLS", "New Delhi", 28.6436, 77.2196),
            ],
        )
        .with_station(StationInfo {
            code: "NDLS".to_string(),
            name: "New Delhi".to_string(),
            platforms_count: 16,
        })
        .with_station(StationInfo {
            code: "MMCT".to_string(),
            name: "Mumbai Central".to_string(),
            platforms_count: 9,
        })
        .with_station(StationInfo {
            code: "RTM".to_string(),
            name: "Ratlam Jn".to_string(),
            platforms_count: 7,
        })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
