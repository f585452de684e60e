//! HTTP surface: SSE streams, one-shot snapshot reads and health.

use crate::error::Result;
use crate::live::LiveGateway;
use axum::{
    extract::{Path, Request, State},
    http::header,
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use fabric::Fabric;
use futures::StreamExt;
use metrics::counter;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use telemetry::{ApiMetricEvent, TelemetryStore};
use tower_http::cors::CorsLayer;

/// Shared application state.
pub struct AppState {
    pub gateway: Arc<LiveGateway>,
    pub fabric: Arc<Fabric>,
    pub telemetry: TelemetryStore,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/trains/{number}/live", get(train_live_handler))
        .route("/api/v1/trains/{number}/position", get(train_position_handler))
        .route("/api/v1/stations/{code}/live", get(station_live_handler))
        .route("/api/v1/stations/{code}/platforms", get(station_platforms_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_metrics_middleware,
        ))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Records one `api-metrics` event per request. The write happens off the
/// request path so a slow telemetry backend never delays responses.
async fn api_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    let event = ApiMetricEvent {
        method,
        path,
        status_code: response.status().as_u16(),
        duration_ms: started.elapsed().as_millis() as u64,
        user_agent,
        timestamp: Utc::now(),
    };
    let telemetry = state.telemetry.clone();
    tokio::spawn(async move { telemetry.log_api_metric(&event).await });

    response
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.gateway.session_count();
    let topics = state.fabric.topic_count();
    format!(
        r#"{{"status":"ok","sessions":{},"topics":{}}}"#,
        sessions, topics
    )
}

/// SSE stream of live position frames for one train.
async fn train_live_handler(
    Path(number): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse> {
    let session = state.gateway.train_session(&number).await?;
    counter!("gateway_sessions_opened_total", "kind" => "train").increment(1);
    let stream = session.map(|frame| Ok::<_, Infallible>(Event::default().data(frame)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// SSE stream of platform status frames for one station.
async fn station_live_handler(
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse> {
    let session = state.gateway.station_session(&code).await?;
    counter!("gateway_sessions_opened_total", "kind" => "station").increment(1);
    let stream = session.map(|frame| Ok::<_, Infallible>(Event::default().data(frame)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// One-shot position read.
async fn train_position_handler(
    Path(number): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse> {
    let sample = state.gateway.train_position_snapshot(&number).await?;
    Ok(Json(sample))
}

/// One-shot platform occupancy read.
async fn station_platforms_handler(
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse> {
    let (station, platforms) = state.gateway.station_platforms(&code).await?;
    Ok(Json(serde_json::json!({
        "station": station,
        "platforms": platforms,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::LiveGatewayConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::StatusCode;
    use common::{RouteStop, StaticRoutes, StationInfo};
    use fabric::MemoryTransport;
    use std::time::Duration;
    use telemetry::{EventStore, MemoryEventStore, Order, Query, Stream, TimeWindow};
    use tower::ServiceExt;

    fn router() -> (Router, Arc<MemoryEventStore>) {
        let (transport, inbound_rx) = MemoryTransport::new();
        let fabric = Arc::new(Fabric::new(transport, inbound_rx));
        let store = Arc::new(MemoryEventStore::new());
        let telemetry = TelemetryStore::new(store.clone());
        let routes = Arc::new(
            StaticRoutes::new()
                .with_train(
                    "12952",
                    vec![
                        RouteStop {
                            stop_number: 1,
                            station_code: "MMCT".to_string(),
                            station_name: "Mumbai Central".to_string(),
                            latitude: 18.9696,
                            longitude: 72.8195,
                        },
                        RouteStop {
                            stop_number: 2,
                            station_code: "NDLS".to_string(),
                            station_name: "New Delhi".to_string(),
                            latitude: 28.6436,
                            longitude: 77.2196,
                        },
                    ],
                )
                .with_station(StationInfo {
                    code: "NDLS".to_string(),
                    name: "New Delhi".to_string(),
                    platforms_count: 4,
                }),
        );
        let gateway = LiveGateway::new(
            fabric.clone(),
            telemetry.clone(),
            routes,
            LiveGatewayConfig::default(),
        );
        let state = Arc::new(AppState {
            gateway,
            fabric,
            telemetry,
        });
        (create_router(state), store)
    }

    // The metric write is spawned off the request path.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn every_request_lands_on_the_api_metrics_stream() {
        let (router, store) = router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stations/NDLS/platforms")
                    .header(header::USER_AGENT, "rail-live-cli/1.0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        settle().await;

        let rows = store
            .query(
                Stream::ApiMetrics,
                &Query::all(Order::Desc),
                TimeWindow::last_hours(1),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let event: ApiMetricEvent = serde_json::from_value(rows[0].clone()).unwrap();
        assert_eq!(event.method, "GET");
        assert_eq!(event.path, "/api/v1/stations/NDLS/platforms");
        assert_eq!(event.status_code, 200);
        assert_eq!(event.user_agent.as_deref(), Some("rail-live-cli/1.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_requests_are_logged_with_their_status() {
        let (router, store) = router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/trains/99999/position")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        settle().await;

        let rows = store
            .query(
                Stream::ApiMetrics,
                &Query::all(Order::Desc),
                TimeWindow::last_hours(1),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let event: ApiMetricEvent = serde_json::from_value(rows[0].clone()).unwrap();
        assert_eq!(event.status_code, 404);
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_session_and_topic_counts() {
        let (router, _store) = router();

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["sessions"], 0);
        assert_eq!(parsed["topics"], 0);
    }
}
