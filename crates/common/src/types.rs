//! Snapshot and domain types shared across the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived live position for a train.
///
/// Ephemeral: lives only in the cache (short TTL) and on the wire to
/// streaming clients. Always reconstructable from the telemetry store, or
/// synthesized from route waypoints when no telemetry exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePositionSample {
    pub train_number: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmph: f64,
    pub delay_minutes: i64,
    pub current_station: String,
    pub next_station: String,
    pub eta_next: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    /// True for positions produced by the synthesis fallback rather than
    /// real telemetry. Authoritative feeds omit the field, so it defaults
    /// to false on decode.
    #[serde(default)]
    pub is_simulated: bool,
}

/// Occupancy of a single platform at a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub platform_number: u32,
    pub current_train: Option<String>,
    pub next_train: Option<String>,
}

impl PlatformStatus {
    pub fn empty(platform_number: u32) -> Self {
        Self {
            platform_number,
            current_train: None,
            next_train: None,
        }
    }
}

/// One stop on a train's route, with station coordinates for interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub stop_number: u32,
    pub station_code: String,
    pub station_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Static station facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    pub code: String,
    pub name: String,
    pub platforms_count: u32,
}

/// Search hit returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub kind: String,
    pub id: String,
    pub name: String,
}

/// Category of a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Delay,
    PlatformChange,
    PnrUpdate,
    DepartureReminder,
}

/// Push notification handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}
