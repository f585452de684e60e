//! Wire frames for streaming sessions.
//!
//! Train sessions carry bare [`LivePositionSample`] frames. Station sessions
//! carry a tagged union so clients can tell the initial snapshot from later
//! refreshes and piggybacked train positions.

use chrono::{DateTime, Utc};
use common::{LivePositionSample, PlatformStatus, StationInfo};
use serde::{Deserialize, Serialize};
use telemetry::PlatformChangeEvent;

/// Frame sent on a station session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StationFrame {
    /// First frame after connect: station facts plus current occupancy.
    InitialStatus {
        station: StationInfo,
        platforms: Vec<PlatformStatus>,
        timestamp: DateTime<Utc>,
    },
    /// Periodic occupancy refresh.
    PlatformRefresh {
        platforms: Vec<PlatformStatus>,
        timestamp: DateTime<Utc>,
    },
    /// A tracked train's position, republished on the station topic while
    /// the train is at or approaching this station.
    TrainPositionUpdate { position: LivePositionSample },
}

/// Fold platform-change events (newest first) into per-platform occupancy.
///
/// An arrival fills `current_train`, an "expected" event fills `next_train`,
/// a departure leaves the platform empty. The newest event per slot wins;
/// events naming a platform outside `1..=platforms_count` (or one that does
/// not parse as a number) are ignored.
pub fn fold_platform_status(
    platforms_count: u32,
    events: &[PlatformChangeEvent],
) -> Vec<PlatformStatus> {
    let count = platforms_count as usize;
    let mut platforms: Vec<PlatformStatus> =
        (1..=platforms_count).map(PlatformStatus::empty).collect();
    let mut current_settled = vec![false; count];
    let mut next_settled = vec![false; count];

    for event in events {
        let index = match event.platform_number.trim().parse::<u32>() {
            Ok(n) if (1..=platforms_count).contains(&n) => (n - 1) as usize,
            _ => continue,
        };

        match event.event_type.as_str() {
            "arrival" if !current_settled[index] => {
                platforms[index].current_train = Some(event.train_number.clone());
                current_settled[index] = true;
            }
            "departure" if !current_settled[index] => {
                // Newest event is a departure: the platform is free.
                current_settled[index] = true;
            }
            "expected" if !next_settled[index] => {
                platforms[index].next_train = Some(event.train_number.clone());
                next_settled[index] = true;
            }
            _ => {}
        }
    }

    platforms
}
