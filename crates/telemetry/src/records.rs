//! Stream catalogue and typed event records.
//!
//! Field names are the wire contract shared with the ingestion feed, so
//! every record serializes in snake_case exactly as the backend stores it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed catalogue of event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    TrainPositions,
    PlatformChanges,
    DelayEvents,
    PnrStatusChanges,
    AppLogs,
    ApiMetrics,
    WorkerLogs,
    SystemEvents,
}

impl Stream {
    pub const ALL: [Stream; 8] = [
        Stream::TrainPositions,
        Stream::PlatformChanges,
        Stream::DelayEvents,
        Stream::PnrStatusChanges,
        Stream::AppLogs,
        Stream::ApiMetrics,
        Stream::WorkerLogs,
        Stream::SystemEvents,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stream::TrainPositions => "train-positions",
            Stream::PlatformChanges => "platform-changes",
            Stream::DelayEvents => "delay-events",
            Stream::PnrStatusChanges => "pnr-status-changes",
            Stream::AppLogs => "app-logs",
            Stream::ApiMetrics => "api-metrics",
            Stream::WorkerLogs => "worker-logs",
            Stream::SystemEvents => "system-events",
        }
    }

    /// Observability streams swallow ingest failures; primary streams
    /// propagate them so job retries can act.
    pub fn is_observability(self) -> bool {
        matches!(
            self,
            Stream::AppLogs | Stream::ApiMetrics | Stream::WorkerLogs | Stream::SystemEvents
        )
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw GPS/telemetry reading for a train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainPositionEvent {
    pub train_number: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmph: f64,
    pub delay_minutes: i64,
    pub current_station: String,
    pub next_station: String,
    pub eta_next: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// Platform occupancy change at a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformChangeEvent {
    pub station_code: String,
    pub platform_number: String,
    pub train_number: String,
    /// "arrival", "departure" or "expected".
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Recorded delay at a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayEvent {
    pub train_number: String,
    pub station_code: String,
    pub scheduled_time: String,
    pub actual_time: String,
    pub delay_minutes: i64,
    pub cause: String,
    pub timestamp: DateTime<Utc>,
}

/// PNR booking status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnrStatusChangeEvent {
    pub pnr: String,
    pub old_status: String,
    pub new_status: String,
    pub coach: String,
    pub berth: String,
    pub timestamp: DateTime<Utc>,
}

/// Application log line (observability stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppLogEvent {
    pub service: String,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-request API metric (observability stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMetricEvent {
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Worker/job log line (observability stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLogEvent {
    pub worker: String,
    pub job: String,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle/system event (observability stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub service: String,
    pub event: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_names_match_the_backend_catalogue() {
        let names: Vec<&str> = Stream::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "train-positions",
                "platform-changes",
                "delay-events",
                "pnr-status-changes",
                "app-logs",
                "api-metrics",
                "worker-logs",
                "system-events",
            ]
        );
    }

    #[test]
    fn observability_split() {
        assert!(!Stream::TrainPositions.is_observability());
        assert!(!Stream::PnrStatusChanges.is_observability());
        assert!(Stream::AppLogs.is_observability());
        assert!(Stream::WorkerLogs.is_observability());
    }

    #[test]
    fn train_position_round_trips_the_feed_shape() {
        let json = r#"{
            "train_number": "12952",
            "latitude": 23.1765,
            "longitude": 75.7885,
            "speed_kmph": 110.5,
            "delay_minutes": 8,
            "current_station": "UJN",
            "next_station": "RTM",
            "eta_next": "2026-08-30T12:10:00Z",
            "timestamp": "2026-08-30T10:00:00Z"
        }"#;
        let event: TrainPositionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.next_station, "RTM");
        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["speed_kmph"], 110.5);
        assert_eq!(back["timestamp"], "2026-08-30T10:00:00Z");
    }
}
