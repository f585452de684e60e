//! Fabric error types.
//!
//! These stay internal to the fabric: the public [`crate::Fabric`] surface
//! absorbs them into absent results and warn logs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FabricError {
    /// Redis command or connection error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backing store is unreachable.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Internal channel to the transport task closed.
    #[error("transport channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, FabricError>;
