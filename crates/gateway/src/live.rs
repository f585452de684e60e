//! Live streaming sessions.
//!
//! A session combines two independent feeds into one bounded channel: push
//! (frames published on the resource's fabric topic) and pull (an interval
//! timer re-reading the snapshot). Every frame is a full-replace snapshot,
//! so a slow client that drops frames only loses staleness, never state.

use crate::error::{GatewayError, Result};
use crate::protocol::{fold_platform_status, StationFrame};
use crate::synthesis;
use chrono::Utc;
use common::{keys, topics, LivePositionSample, PlatformStatus, RouteRepository, RouteStop, StationInfo};
use fabric::{Fabric, Handler, Subscription};
use futures::Stream;
use metrics::{counter, gauge};
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use telemetry::{TelemetryStore, TrainPositionEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// How long a cached train position stays authoritative.
pub const POSITION_CACHE_TTL: Duration = Duration::from_secs(120);
/// Lookback for folding platform-change events into occupancy.
pub const PLATFORM_LOOKBACK_HOURS: i64 = 4;

#[derive(Debug, Clone)]
pub struct LiveGatewayConfig {
    /// Pull interval for train sessions.
    pub train_poll: Duration,
    /// Pull interval for station sessions.
    pub station_poll: Duration,
    /// Frames buffered per session before a slow client starts losing them.
    pub session_buffer: usize,
}

impl Default for LiveGatewayConfig {
    fn default() -> Self {
        Self {
            train_poll: Duration::from_secs(30),
            station_poll: Duration::from_secs(60),
            session_buffer: 32,
        }
    }
}

/// Serves live train/station sessions and one-shot snapshot reads.
pub struct LiveGateway {
    fabric: Arc<Fabric>,
    telemetry: TelemetryStore,
    routes: Arc<dyn RouteRepository>,
    config: LiveGatewayConfig,
    sessions: Arc<AtomicUsize>,
}

impl LiveGateway {
    pub fn new(
        fabric: Arc<Fabric>,
        telemetry: TelemetryStore,
        routes: Arc<dyn RouteRepository>,
        config: LiveGatewayConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            fabric,
            telemetry,
            routes,
            config,
            sessions: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Open a streaming session for a train. Fails with `NotFound` for an
    /// unknown train number; everything else degrades, never errors.
    pub async fn train_session(self: &Arc<Self>, train_number: &str) -> Result<SessionStream> {
        let route = self
            .routes
            .train_route(train_number)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("train {train_number}")))?;

        let (tx, rx) = mpsc::channel(self.config.session_buffer);
        let subscription = self
            .fabric
            .subscribe(&topics::train_live(train_number), push_handler(tx.clone()))
            .await;

        let gateway = Arc::clone(self);
        let number = train_number.to_string();
        let poll = self.config.train_poll;
        let poll_task = tokio::spawn(async move {
            // First tick fires immediately: the connecting snapshot.
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match gateway.train_position(&number, &route).await {
                    Some(sample) => send_frame(&tx, &sample),
                    None => debug!(train = %number, "no position available for snapshot"),
                }
            }
        });

        Ok(self.open_session(subscription, poll_task, rx))
    }

    /// Open a streaming session for a station.
    pub async fn station_session(self: &Arc<Self>, code: &str) -> Result<SessionStream> {
        let station = self
            .routes
            .station(code)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("station {code}")))?;

        let (tx, rx) = mpsc::channel(self.config.session_buffer);
        let subscription = self
            .fabric
            .subscribe(&topics::station_live(&station.code), push_handler(tx.clone()))
            .await;

        let gateway = Arc::clone(self);
        let poll = self.config.station_poll;
        let poll_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut first = true;
            loop {
                ticker.tick().await;
                let platforms = gateway.platform_status(&station).await;
                let frame = if std::mem::take(&mut first) {
                    StationFrame::InitialStatus {
                        station: station.clone(),
                        platforms,
                        timestamp: Utc::now(),
                    }
                } else {
                    StationFrame::PlatformRefresh {
                        platforms,
                        timestamp: Utc::now(),
                    }
                };
                send_frame(&tx, &frame);
            }
        });

        Ok(self.open_session(subscription, poll_task, rx))
    }

    /// One-shot position read backing the REST endpoint.
    pub async fn train_position_snapshot(&self, train_number: &str) -> Result<LivePositionSample> {
        let route = self
            .routes
            .train_route(train_number)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("train {train_number}")))?;
        self.train_position(train_number, &route)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("no position for train {train_number}")))
    }

    /// One-shot platform occupancy read backing the REST endpoint.
    pub async fn station_platforms(&self, code: &str) -> Result<(StationInfo, Vec<PlatformStatus>)> {
        let station = self
            .routes
            .station(code)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("station {code}")))?;
        let platforms = self.platform_status(&station).await;
        Ok((station, platforms))
    }

    /// Snapshot chain: cache, then recent telemetry, then synthesis.
    async fn train_position(&self, train_number: &str, route: &[RouteStop]) -> Option<LivePositionSample> {
        if let Some(sample) = self
            .fabric
            .get_json::<LivePositionSample>(&keys::train_position(train_number))
            .await
        {
            return Some(sample);
        }

        if let Some(event) = self.telemetry.latest_train_position(train_number).await {
            return Some(sample_from_telemetry(event));
        }

        let sample = synthesis::synthesize_position(train_number, route)?;
        counter!("gateway_synthesized_positions_total").increment(1);
        Some(sample)
    }

    async fn platform_status(&self, station: &StationInfo) -> Vec<PlatformStatus> {
        let events = self
            .telemetry
            .station_events(&station.code, PLATFORM_LOOKBACK_HOURS)
            .await;
        fold_platform_status(station.platforms_count, &events)
    }

    fn open_session(
        &self,
        subscription: Subscription,
        poll_task: JoinHandle<()>,
        rx: mpsc::Receiver<String>,
    ) -> SessionStream {
        let active = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("gateway_active_sessions").set(active as f64);
        SessionStream {
            rx,
            poll_task,
            sessions: Arc::clone(&self.sessions),
            _subscription: subscription,
        }
    }
}

/// An authoritative sample derived from stored telemetry.
pub fn sample_from_telemetry(event: TrainPositionEvent) -> LivePositionSample {
    LivePositionSample {
        train_number: event.train_number,
        latitude: event.latitude,
        longitude: event.longitude,
        speed_kmph: event.speed_kmph,
        delay_minutes: event.delay_minutes,
        current_station: event.current_station,
        next_station: event.next_station,
        eta_next: event.eta_next,
        timestamp: event.timestamp,
        is_simulated: false,
    }
}

/// Topic handler forwarding well-formed JSON payloads into the session
/// channel verbatim. Malformed payloads error out and are logged by the
/// dispatcher without touching other subscribers.
fn push_handler(tx: mpsc::Sender<String>) -> Handler {
    Arc::new(move |payload: &[u8]| {
        let text = std::str::from_utf8(payload)?;
        serde_json::from_str::<serde_json::Value>(text)?;
        if tx.try_send(text.to_owned()).is_err() {
            counter!("gateway_frames_dropped_total").increment(1);
        }
        Ok(())
    })
}

fn send_frame<T: Serialize>(tx: &mpsc::Sender<String>, frame: &T) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            if tx.try_send(text).is_err() {
                counter!("gateway_frames_dropped_total").increment(1);
            }
        }
        Err(err) => warn!("frame serialization failed: {err}"),
    }
}

/// Stream of JSON frames for one client.
///
/// Dropping the stream ends the session: the topic handler is removed
/// synchronously and the poll task aborted, so nothing is dispatched after
/// close even when racing a concurrent publish.
pub struct SessionStream {
    rx: mpsc::Receiver<String>,
    poll_task: JoinHandle<()>,
    sessions: Arc<AtomicUsize>,
    _subscription: Subscription,
}

impl Stream for SessionStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.poll_task.abort();
        let active = self.sessions.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        gauge!("gateway_active_sessions").set(active as f64);
    }
}
