//! Telemetry/event store adapter.
//!
//! Owns all interaction with the append-only telemetry backend and is the
//! sole source of truth for "latest known" values when the cache is cold.
//! Queries are always time-windowed and degrade to empty results when the
//! backend is unreachable; ingest raises for primary telemetry streams (so
//! the job queue's retry policy can act) and is swallowed for
//! observability streams.

mod error;
mod http;
mod memory;
mod records;
mod service;
mod store;

pub use error::{Result, TelemetryError};
pub use http::HttpEventStore;
pub use memory::MemoryEventStore;
pub use records::{
    ApiMetricEvent, AppLogEvent, DelayEvent, PlatformChangeEvent, PnrStatusChangeEvent, Stream,
    SystemEvent, TrainPositionEvent, WorkerLogEvent,
};
pub use service::TelemetryStore;
pub use store::{EventStore, Order, Query, TimeWindow};
