//! Live update gateway.
//!
//! Streams train positions and station platform status to clients over SSE,
//! backed by the cache/pub-sub fabric, the telemetry store and the job
//! queues. Also hosts the queue processors that feed those streams.

pub mod error;
pub mod live;
pub mod processors;
pub mod protocol;
pub mod server;
pub mod synthesis;

pub use error::{GatewayError, Result};
pub use live::{LiveGateway, LiveGatewayConfig, SessionStream};
pub use processors::{
    DataSyncProcessor, NotificationDispatchProcessor, PositionPollProcessor,
    StatusRefreshProcessor,
};
pub use protocol::StationFrame;
pub use server::{create_router, AppState};
