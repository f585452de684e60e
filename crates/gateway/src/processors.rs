//! Queue processors: the write side of the live distribution loop.
//!
//! Each processor drains one queue and performs idempotent, last-write-wins
//! side effects (cache writes and topic publishes), so retries after partial
//! failure are always safe.

use crate::live::{sample_from_telemetry, POSITION_CACHE_TTL};
use crate::protocol::StationFrame;
use async_trait::async_trait;
use common::{keys, topics, NotificationMessage, NotificationService, SearchService};
use fabric::Fabric;
use jobs::{Job, JobPayload, Processor};
use std::sync::Arc;
use std::time::Duration;
use telemetry::TelemetryStore;
use tracing::debug;

/// How long a refreshed PNR status stays cached.
const PNR_STATUS_TTL: Duration = Duration::from_secs(300);

/// PositionPoll: pull the latest telemetry for a train, refresh the cache
/// and fan the position out to train and station subscribers. Absence of
/// recent telemetry is success, not failure.
pub struct PositionPollProcessor {
    fabric: Arc<Fabric>,
    telemetry: TelemetryStore,
}

impl PositionPollProcessor {
    pub fn new(fabric: Arc<Fabric>, telemetry: TelemetryStore) -> Arc<Self> {
        Arc::new(Self { fabric, telemetry })
    }
}

#[async_trait]
impl Processor for PositionPollProcessor {
    async fn process(&self, job: &Job) -> anyhow::Result<()> {
        let JobPayload::PositionPoll { train_number } = &job.payload else {
            anyhow::bail!("unexpected payload on position-poll queue");
        };

        let Some(event) = self.telemetry.latest_train_position(train_number).await else {
            debug!(train = %train_number, "no recent telemetry, nothing to distribute");
            return Ok(());
        };

        let sample = sample_from_telemetry(event);
        self.fabric
            .set_json(
                &keys::train_position(train_number),
                &sample,
                Some(POSITION_CACHE_TTL),
            )
            .await;
        self.fabric
            .publish_json(&topics::train_live(train_number), &sample)
            .await;

        if !sample.current_station.is_empty() {
            let station = sample.current_station.clone();
            let frame = StationFrame::TrainPositionUpdate { position: sample };
            self.fabric
                .publish_json(&topics::station_live(&station), &frame)
                .await;
        }

        self.telemetry
            .log_worker("position-poll", &job.name, "info", "position distributed", 0)
            .await;
        Ok(())
    }
}

/// StatusRefresh: re-read the newest PNR status change, cache it and notify
/// subscribers of that PNR.
pub struct StatusRefreshProcessor {
    fabric: Arc<Fabric>,
    telemetry: TelemetryStore,
}

impl StatusRefreshProcessor {
    pub fn new(fabric: Arc<Fabric>, telemetry: TelemetryStore) -> Arc<Self> {
        Arc::new(Self { fabric, telemetry })
    }
}

#[async_trait]
impl Processor for StatusRefreshProcessor {
    async fn process(&self, job: &Job) -> anyhow::Result<()> {
        let JobPayload::StatusRefresh { pnr, .. } = &job.payload else {
            anyhow::bail!("unexpected payload on status-refresh queue");
        };

        let Some(change) = self.telemetry.pnr_status_changes(pnr).await.into_iter().next() else {
            debug!(pnr = %pnr, "no status changes on record");
            return Ok(());
        };

        let status = serde_json::json!({
            "pnr": pnr,
            "status": change.new_status,
            "updated_at": change.timestamp,
        });
        self.fabric
            .set_json(&keys::pnr_status(pnr), &status, Some(PNR_STATUS_TTL))
            .await;
        self.fabric
            .publish_json(&topics::pnr_update(pnr), &status)
            .await;
        Ok(())
    }
}

/// NotificationDispatch: hand the message to the push collaborator.
/// Delivery errors propagate so the retry policy applies.
pub struct NotificationDispatchProcessor {
    notifier: Arc<dyn NotificationService>,
}

impl NotificationDispatchProcessor {
    pub fn new(notifier: Arc<dyn NotificationService>) -> Arc<Self> {
        Arc::new(Self { notifier })
    }
}

#[async_trait]
impl Processor for NotificationDispatchProcessor {
    async fn process(&self, job: &Job) -> anyhow::Result<()> {
        let JobPayload::NotificationDispatch {
            user_id,
            kind,
            title,
            body,
            data,
        } = &job.payload
        else {
            anyhow::bail!("unexpected payload on notification-dispatch queue");
        };

        let message = NotificationMessage {
            kind: *kind,
            title: title.clone(),
            body: body.clone(),
            data: data.clone(),
        };
        self.notifier.dispatch(user_id, &message).await
    }
}

/// DataSync: re-index static data into the search collaborator.
pub struct DataSyncProcessor {
    search: Arc<dyn SearchService>,
}

impl DataSyncProcessor {
    pub fn new(search: Arc<dyn SearchService>) -> Arc<Self> {
        Arc::new(Self { search })
    }
}

#[async_trait]
impl Processor for DataSyncProcessor {
    async fn process(&self, _job: &Job) -> anyhow::Result<()> {
        self.search.sync_data().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{LivePositionSample, NotificationKind};
    use fabric::MemoryTransport;
    use jobs::JobOptions;
    use std::sync::Mutex;
    use telemetry::{MemoryEventStore, PnrStatusChangeEvent, TrainPositionEvent};

    fn fabric_pair() -> (Arc<Fabric>, Arc<MemoryTransport>) {
        let (transport, inbound_rx) = MemoryTransport::new();
        (Arc::new(Fabric::new(transport.clone(), inbound_rx)), transport)
    }

    fn telemetry_store() -> (TelemetryStore, Arc<MemoryEventStore>) {
        let store = Arc::new(MemoryEventStore::new());
        (TelemetryStore::new(store.clone()), store)
    }

    fn job(payload: JobPayload) -> Job {
        Job::new(payload.queue(), "test-job", payload, &JobOptions::default())
    }

    fn position_event(train: &str) -> TrainPositionEvent {
        TrainPositionEvent {
            train_number: train.to_string(),
            latitude: 22.31,
            longitude: 73.18,
            speed_kmph: 120.0,
            delay_minutes: 0,
            current_station: "BRC".to_string(),
            next_station: "RTM".to_string(),
            eta_next: Utc::now() + chrono::Duration::minutes(55),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn position_poll_caches_and_fans_out() {
        let (fabric, _) = fabric_pair();
        let (telemetry, _) = telemetry_store();
        telemetry
            .ingest_train_position(&position_event("12952"))
            .await
            .unwrap();

        let train_frames = Arc::new(Mutex::new(Vec::new()));
        let sink = train_frames.clone();
        let _train_sub = fabric
            .subscribe(
                &topics::train_live("12952"),
                Arc::new(move |payload: &[u8]| {
                    sink.lock().unwrap().push(payload.to_vec());
                    Ok(())
                }),
            )
            .await;

        let station_frames = Arc::new(Mutex::new(Vec::new()));
        let sink = station_frames.clone();
        let _station_sub = fabric
            .subscribe(
                &topics::station_live("BRC"),
                Arc::new(move |payload: &[u8]| {
                    sink.lock().unwrap().push(payload.to_vec());
                    Ok(())
                }),
            )
            .await;

        let processor = PositionPollProcessor::new(fabric.clone(), telemetry);
        processor
            .process(&job(JobPayload::PositionPoll {
                train_number: "12952".to_string(),
            }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cached: LivePositionSample = fabric
            .get_json(&keys::train_position("12952"))
            .await
            .unwrap();
        assert_eq!(cached.current_station, "BRC");
        assert!(!cached.is_simulated);

        let frames = train_frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let sample: LivePositionSample = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(sample, cached);

        let frames = station_frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let frame: StationFrame = serde_json::from_slice(&frames[0]).unwrap();
        assert!(matches!(frame, StationFrame::TrainPositionUpdate { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn position_poll_without_telemetry_succeeds_and_writes_nothing() {
        let (fabric, _) = fabric_pair();
        let (telemetry, _) = telemetry_store();

        let processor = PositionPollProcessor::new(fabric.clone(), telemetry);
        processor
            .process(&job(JobPayload::PositionPoll {
                train_number: "12952".to_string(),
            }))
            .await
            .unwrap();

        assert!(fabric
            .get_json::<LivePositionSample>(&keys::train_position("12952"))
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn status_refresh_publishes_the_newest_change() {
        let (fabric, _) = fabric_pair();
        let (telemetry, _) = telemetry_store();
        telemetry
            .ingest_pnr_status_change(&PnrStatusChangeEvent {
                pnr: "8642317590".to_string(),
                old_status: "WL/12".to_string(),
                new_status: "CNF/B4/32".to_string(),
                coach: "B4".to_string(),
                berth: "32".to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        let _sub = fabric
            .subscribe(
                &topics::pnr_update("8642317590"),
                Arc::new(move |payload: &[u8]| {
                    sink.lock().unwrap().push(payload.to_vec());
                    Ok(())
                }),
            )
            .await;

        let processor = StatusRefreshProcessor::new(fabric.clone(), telemetry);
        processor
            .process(&job(JobPayload::StatusRefresh {
                pnr: "8642317590".to_string(),
                user_id: "u1".to_string(),
            }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cached: serde_json::Value = fabric
            .get_json(&keys::pnr_status("8642317590"))
            .await
            .unwrap();
        assert_eq!(cached["status"], "CNF/B4/32");

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        let update: serde_json::Value = serde_json::from_slice(&updates[0]).unwrap();
        assert_eq!(update["pnr"], "8642317590");
        assert_eq!(update["status"], "CNF/B4/32");
    }

    struct RecordingNotifier {
        sent: Mutex<Vec<(String, NotificationMessage)>>,
    }

    #[async_trait]
    impl NotificationService for RecordingNotifier {
        async fn dispatch(&self, user_id: &str, message: &NotificationMessage) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((user_id.to_string(), message.clone()));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn notification_dispatch_forwards_to_the_collaborator() {
        let notifier = Arc::new(RecordingNotifier {
            sent: Mutex::new(Vec::new()),
        });
        let processor = NotificationDispatchProcessor::new(notifier.clone());

        processor
            .process(&job(JobPayload::NotificationDispatch {
                user_id: "u7".to_string(),
                kind: NotificationKind::PlatformChange,
                title: "Platform change".to_string(),
                body: "12952 now departs from platform 5".to_string(),
                data: serde_json::json!({"train": "12952"}),
            }))
            .await
            .unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u7");
        assert_eq!(sent[0].1.kind, NotificationKind::PlatformChange);
    }

    struct FailingSearch;

    #[async_trait]
    impl SearchService for FailingSearch {
        async fn search(&self, _query: &str) -> anyhow::Result<Vec<common::SearchResult>> {
            Ok(Vec::new())
        }

        async fn sync_data(&self) -> anyhow::Result<()> {
            anyhow::bail!("search backend unreachable")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn data_sync_errors_propagate_for_retry() {
        let processor = DataSyncProcessor::new(Arc::new(FailingSearch));
        let result = processor
            .process(&job(JobPayload::DataSync {
                scope: "all".to_string(),
            }))
            .await;
        assert!(result.is_err());
    }
}
