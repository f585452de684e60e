//! In-memory transport for tests and local runs.

use crate::error::{FabricError, Result};
use crate::pattern::glob_match;
use crate::transport::{Inbound, Transport};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Transport backed by process memory.
///
/// TTLs run on the tokio clock so paused-time tests can drive expiry.
/// Publishes loop straight back to the inbound channel for subscribed
/// topics. `set_available(false)` simulates a backend outage.
pub struct MemoryTransport {
    entries: DashMap<String, Entry>,
    subscribed: DashSet<String>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    available: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            entries: DashMap::new(),
            subscribed: DashSet::new(),
            inbound_tx,
            available: AtomicBool::new(true),
        });
        (transport, inbound_rx)
    }

    /// Simulate the backend going down (`false`) or recovering (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a wire-level subscription currently exists for the topic.
    pub fn is_topic_subscribed(&self, topic: &str) -> bool {
        self.subscribed.contains(topic)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FabricError::Unavailable("memory transport offline".into()))
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        match self.entries.get(key) {
            Some(entry) => {
                if let Some(expires_at) = entry.expires_at {
                    if Instant::now() >= expires_at {
                        drop(entry);
                        self.entries.remove(key);
                        return Ok(None);
                    }
                }
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check_available()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn del_pattern(&self, pattern: &str) -> Result<()> {
        self.check_available()?;
        self.entries.retain(|key, _| !glob_match(pattern, key));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.check_available()?;
        if self.subscribed.contains(topic) {
            self.inbound_tx
                .send(Inbound {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .map_err(|_| FabricError::ChannelClosed)?;
        }
        Ok(())
    }

    async fn subscribe_topic(&self, topic: &str) -> Result<()> {
        self.check_available()?;
        self.subscribed.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        self.check_available()?;
        self.subscribed.remove(topic);
        Ok(())
    }
}
