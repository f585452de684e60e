//! Position synthesis fallback.
//!
//! When a train has no cached position and no recent telemetry, a plausible
//! position is interpolated from its route waypoints so streaming clients
//! always get a first frame. Synthesized samples are marked `is_simulated`.

use chrono::{Duration, Utc};
use common::{LivePositionSample, RouteStop};
use rand::Rng;

/// Interpolate a position somewhere strictly between two adjacent stops of
/// `route`. Returns `None` when the route has fewer than two stops, since
/// there is no segment to place the train on.
pub fn synthesize_position(train_number: &str, route: &[RouteStop]) -> Option<LivePositionSample> {
    if route.len() < 2 {
        return None;
    }

    let mut rng = rand::thread_rng();
    let segment = rng.gen_range(0..route.len() - 1);
    let from = &route[segment];
    let to = &route[segment + 1];

    // t in (0, 1): never exactly at a station.
    let mut t: f64 = rng.gen();
    if t == 0.0 {
        t = f64::EPSILON;
    }

    let latitude = from.latitude + (to.latitude - from.latitude) * t;
    let longitude = from.longitude + (to.longitude - from.longitude) * t;
    let speed_kmph = rng.gen_range(60.0..=140.0);
    let delay_minutes = if rng.gen_bool(0.7) {
        0
    } else {
        rng.gen_range(0..=30)
    };
    let now = Utc::now();

    Some(LivePositionSample {
        train_number: train_number.to_string(),
        latitude,
        longitude,
        speed_kmph,
        delay_minutes,
        current_station: from.station_code.clone(),
        next_station: to.station_code.clone(),
        eta_next: now + Duration::minutes(rng.gen_range(5..=60)),
        timestamp: now,
        is_simulated: true,
    })
}
