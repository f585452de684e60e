//! Event store seam: windowed queries over append-only streams.

use crate::error::Result;
use crate::records::Stream;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Explicit query bounds. There are no unbounded scans: every query names
/// its window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window ending now and reaching back the given number of hours.
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::hours(hours),
            end,
        }
    }

    /// Window ending now and reaching back the given number of days.
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Result ordering by record timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Stream query: optional field-equality filter, ordering, optional limit.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    pub eq: Option<(&'a str, &'a str)>,
    pub order: Order,
    pub limit: Option<usize>,
}

impl<'a> Query<'a> {
    pub fn all(order: Order) -> Self {
        Self {
            eq: None,
            order,
            limit: None,
        }
    }

    pub fn eq(field: &'a str, value: &'a str, order: Order) -> Self {
        Self {
            eq: Some((field, value)),
            order,
            limit: None,
        }
    }

    pub fn latest(field: &'a str, value: &'a str) -> Self {
        Self {
            eq: Some((field, value)),
            order: Order::Desc,
            limit: Some(1),
        }
    }
}

/// Append-only event store backend.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append records to a stream. Records carry their own timestamps.
    async fn ingest_batch(&self, stream: Stream, records: Vec<Value>) -> Result<()>;

    async fn ingest(&self, stream: Stream, record: Value) -> Result<()> {
        self.ingest_batch(stream, vec![record]).await
    }

    /// Windowed query returning raw rows ordered by timestamp.
    async fn query(&self, stream: Stream, query: &Query<'_>, window: TimeWindow)
        -> Result<Vec<Value>>;

    /// Create the stream if it does not exist yet.
    async fn ensure_stream(&self, stream: Stream) -> Result<()>;
}
