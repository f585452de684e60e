//! Backend transport seam.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Message delivered by the transport for a subscribed topic.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Backing store for the fabric: key/value commands plus wire-level pub/sub.
///
/// Implementations deliver inbound topic messages on the channel handed out
/// at construction time; the fabric's dispatch task consumes it, which is
/// what gives per-topic delivery ordering.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// A write with a TTL supersedes any previous value and TTL for the key.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    async fn del_pattern(&self, pattern: &str) -> Result<()>;

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Establish the wire-level subscription for a topic.
    async fn subscribe_topic(&self, topic: &str) -> Result<()>;

    /// Tear down the wire-level subscription for a topic.
    async fn unsubscribe_topic(&self, topic: &str) -> Result<()>;
}
