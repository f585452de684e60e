//! In-memory event store for tests and local runs.

use crate::error::{Result, TelemetryError};
use crate::records::Stream;
use crate::store::{EventStore, Order, Query, TimeWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// Event store backed by per-stream vectors.
///
/// `set_available(false)` simulates the backend being unreachable.
#[derive(Default)]
pub struct MemoryEventStore {
    streams: DashMap<&'static str, Vec<Value>>,
    unavailable: AtomicBool,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self, stream: Stream) -> usize {
        self.streams.get(stream.name()).map_or(0, |s| s.len())
    }

    pub fn is_empty(&self, stream: Stream) -> bool {
        self.len(stream) == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(TelemetryError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

fn record_timestamp(record: &Value) -> Option<DateTime<Utc>> {
    record
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn ingest_batch(&self, stream: Stream, records: Vec<Value>) -> Result<()> {
        self.check_available()?;
        self.streams
            .entry(stream.name())
            .or_default()
            .extend(records);
        Ok(())
    }

    async fn query(
        &self,
        stream: Stream,
        query: &Query<'_>,
        window: TimeWindow,
    ) -> Result<Vec<Value>> {
        self.check_available()?;

        let mut rows: Vec<(DateTime<Utc>, Value)> = match self.streams.get(stream.name()) {
            Some(records) => records
                .iter()
                .filter(|record| match query.eq {
                    Some((field, value)) => {
                        record.get(field).and_then(Value::as_str) == Some(value)
                    }
                    None => true,
                })
                .filter_map(|record| {
                    let at = record_timestamp(record)?;
                    window.contains(at).then(|| (at, record.clone()))
                })
                .collect(),
            None => Vec::new(),
        };

        rows.sort_by_key(|(at, _)| *at);
        if query.order == Order::Desc {
            rows.reverse();
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows.into_iter().map(|(_, record)| record).collect())
    }

    async fn ensure_stream(&self, stream: Stream) -> Result<()> {
        self.check_available()?;
        self.streams.entry(stream.name()).or_default();
        Ok(())
    }
}
