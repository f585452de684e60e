//! Typed telemetry façade with the degradation policy.

use crate::error::Result;
use crate::records::{
    ApiMetricEvent, AppLogEvent, DelayEvent, PlatformChangeEvent, PnrStatusChangeEvent, Stream,
    SystemEvent, TrainPositionEvent, WorkerLogEvent,
};
use crate::store::{EventStore, Order, Query, TimeWindow};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lookback windows, matching what the rest of the system assumes about
/// each stream's freshness.
const LATEST_POSITION_HOURS: i64 = 1;
const PNR_CHANGES_DAYS: i64 = 30;

/// Typed interface over an [`EventStore`].
///
/// Queries degrade to empty results when the backend is unreachable (the
/// caller sees "no data", which is a legitimate, frequent outcome). Ingest
/// propagates errors for primary streams and swallows them for
/// observability streams.
#[derive(Clone)]
pub struct TelemetryStore {
    store: Arc<dyn EventStore>,
}

impl TelemetryStore {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Create the whole stream catalogue. Failures are logged per stream
    /// and never block startup.
    pub async fn ensure_streams(&self) {
        for stream in Stream::ALL {
            if let Err(err) = self.store.ensure_stream(stream).await {
                warn!(stream = stream.name(), "could not ensure stream: {err}");
            }
        }
    }

    pub async fn latest_train_position(&self, train_number: &str) -> Option<TrainPositionEvent> {
        self.query_typed(
            Stream::TrainPositions,
            &Query::latest("train_number", train_number),
            TimeWindow::last_hours(LATEST_POSITION_HOURS),
        )
        .await
        .into_iter()
        .next()
    }

    pub async fn train_position_history(
        &self,
        train_number: &str,
        hours: i64,
    ) -> Vec<TrainPositionEvent> {
        self.query_typed(
            Stream::TrainPositions,
            &Query::eq("train_number", train_number, Order::Asc),
            TimeWindow::last_hours(hours),
        )
        .await
    }

    pub async fn station_events(&self, station_code: &str, hours: i64) -> Vec<PlatformChangeEvent> {
        let code = station_code.to_uppercase();
        self.query_typed(
            Stream::PlatformChanges,
            &Query::eq("station_code", &code, Order::Desc),
            TimeWindow::last_hours(hours),
        )
        .await
    }

    pub async fn delay_events(&self, train_number: &str, hours: i64) -> Vec<DelayEvent> {
        self.query_typed(
            Stream::DelayEvents,
            &Query::eq("train_number", train_number, Order::Desc),
            TimeWindow::last_hours(hours),
        )
        .await
    }

    pub async fn pnr_status_changes(&self, pnr: &str) -> Vec<PnrStatusChangeEvent> {
        self.query_typed(
            Stream::PnrStatusChanges,
            &Query::eq("pnr", pnr, Order::Desc),
            TimeWindow::last_days(PNR_CHANGES_DAYS),
        )
        .await
    }

    pub async fn ingest_train_position(&self, event: &TrainPositionEvent) -> Result<()> {
        self.ingest_primary(Stream::TrainPositions, event).await
    }

    pub async fn ingest_platform_change(&self, event: &PlatformChangeEvent) -> Result<()> {
        self.ingest_primary(Stream::PlatformChanges, event).await
    }

    pub async fn ingest_delay_event(&self, event: &DelayEvent) -> Result<()> {
        self.ingest_primary(Stream::DelayEvents, event).await
    }

    pub async fn ingest_pnr_status_change(&self, event: &PnrStatusChangeEvent) -> Result<()> {
        self.ingest_primary(Stream::PnrStatusChanges, event).await
    }

    pub async fn log_app(&self, level: &str, message: &str, context: &str) {
        self.ingest_observability(
            Stream::AppLogs,
            &AppLogEvent {
                service: "rail-live".to_string(),
                level: level.to_string(),
                message: message.to_string(),
                context: context.to_string(),
                trace_id: String::new(),
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    pub async fn log_api_metric(&self, event: &ApiMetricEvent) {
        self.ingest_observability(Stream::ApiMetrics, event).await;
    }

    pub async fn log_worker(
        &self,
        worker: &str,
        job: &str,
        level: &str,
        message: &str,
        duration_ms: u64,
    ) {
        self.ingest_observability(
            Stream::WorkerLogs,
            &WorkerLogEvent {
                worker: worker.to_string(),
                job: job.to_string(),
                level: level.to_string(),
                message: message.to_string(),
                duration_ms,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    pub async fn log_system_event(&self, service: &str, event: &str, details: Value) {
        self.ingest_observability(
            Stream::SystemEvents,
            &SystemEvent {
                service: service.to_string(),
                event: event.to_string(),
                details,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    async fn query_typed<T: DeserializeOwned>(
        &self,
        stream: Stream,
        query: &Query<'_>,
        window: TimeWindow,
    ) -> Vec<T> {
        match self.store.query(stream, query, window).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| match serde_json::from_value(row) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        // Malformed rows are dropped, not fatal.
                        debug!(stream = stream.name(), "skipping malformed record: {err}");
                        None
                    }
                })
                .collect(),
            Err(err) => {
                warn!(stream = stream.name(), "telemetry query failed: {err}");
                Vec::new()
            }
        }
    }

    async fn ingest_primary<T: Serialize>(&self, stream: Stream, event: &T) -> Result<()> {
        debug_assert!(!stream.is_observability());
        let value = serde_json::to_value(event)?;
        self.store.ingest(stream, value).await
    }

    async fn ingest_observability<T: Serialize>(&self, stream: Stream, event: &T) {
        debug_assert!(stream.is_observability());
        let value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(err) => {
                debug!(stream = stream.name(), "observability record failed to encode: {err}");
                return;
            }
        };
        if let Err(err) = self.store.ingest(stream, value).await {
            // Observability must never raise into caller code.
            debug!(stream = stream.name(), "observability ingest dropped: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEventStore;
    use chrono::Duration;

    fn position(train: &str, minutes_ago: i64) -> TrainPositionEvent {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        TrainPositionEvent {
            train_number: train.to_string(),
            latitude: 23.0,
            longitude: 75.0,
            speed_kmph: 95.0,
            delay_minutes: 4,
            current_station: "UJN".to_string(),
            next_station: "RTM".to_string(),
            eta_next: at + Duration::minutes(40),
            timestamp: at,
        }
    }

    fn service() -> (TelemetryStore, Arc<MemoryEventStore>) {
        let store = Arc::new(MemoryEventStore::new());
        (TelemetryStore::new(store.clone()), store)
    }

    #[tokio::test]
    async fn latest_returns_the_newest_record_for_the_train() {
        let (telemetry, _) = service();
        telemetry
            .ingest_train_position(&position("12952", 30))
            .await
            .unwrap();
        telemetry
            .ingest_train_position(&position("12952", 5))
            .await
            .unwrap();
        telemetry
            .ingest_train_position(&position("12951", 1))
            .await
            .unwrap();

        let latest = telemetry.latest_train_position("12952").await.unwrap();
        assert!(Utc::now() - latest.timestamp < Duration::minutes(10));
    }

    #[tokio::test]
    async fn latest_is_absent_for_unknown_train_and_for_stale_telemetry() {
        let (telemetry, _) = service();
        assert!(telemetry.latest_train_position("12952").await.is_none());

        // Outside the one-hour lookback window.
        telemetry
            .ingest_train_position(&position("12952", 120))
            .await
            .unwrap();
        assert!(telemetry.latest_train_position("12952").await.is_none());
    }

    #[tokio::test]
    async fn delay_events_come_back_newest_first() {
        let (telemetry, _) = service();
        for (minutes_ago, delay) in [(200, 5), (30, 18)] {
            let at = Utc::now() - Duration::minutes(minutes_ago);
            telemetry
                .ingest_delay_event(&DelayEvent {
                    train_number: "12952".to_string(),
                    station_code: "RTM".to_string(),
                    scheduled_time: "14:05".to_string(),
                    actual_time: "14:23".to_string(),
                    delay_minutes: delay,
                    cause: "congestion".to_string(),
                    timestamp: at,
                })
                .await
                .unwrap();
        }

        let delays = telemetry.delay_events("12952", 24).await;
        assert_eq!(delays.len(), 2);
        assert_eq!(delays[0].delay_minutes, 18);
        assert_eq!(delays[1].delay_minutes, 5);
    }

    #[tokio::test]
    async fn queries_degrade_to_empty_when_backend_is_down() {
        let (telemetry, store) = service();
        telemetry
            .ingest_train_position(&position("12952", 5))
            .await
            .unwrap();

        store.set_available(false);
        assert!(telemetry.latest_train_position("12952").await.is_none());
        assert!(telemetry.pnr_status_changes("8642317590").await.is_empty());
    }

    #[tokio::test]
    async fn primary_ingest_propagates_but_observability_is_swallowed() {
        let (telemetry, store) = service();
        store.set_available(false);

        assert!(telemetry
            .ingest_train_position(&position("12952", 0))
            .await
            .is_err());

        // Must not raise.
        telemetry.log_worker("position-poll", "poll-12952", "error", "backend down", 12).await;
        telemetry.log_app("warn", "telemetry unreachable", "startup").await;
        telemetry
            .log_system_event("rail-live", "startup", serde_json::json!({"ok": false}))
            .await;
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_not_fatal() {
        let (telemetry, store) = service();
        store
            .ingest(
                Stream::TrainPositions,
                serde_json::json!({
                    "train_number": "12952",
                    "timestamp": (Utc::now() - Duration::minutes(10)).to_rfc3339(),
                    "latitude": "not-a-number"
                }),
            )
            .await
            .unwrap();
        telemetry
            .ingest_train_position(&position("12952", 2))
            .await
            .unwrap();

        // One good record survives the bad row.
        let history = telemetry.train_position_history("12952", 1).await;
        assert_eq!(history.len(), 1);
        assert!(telemetry.latest_train_position("12952").await.is_some());
    }
}
