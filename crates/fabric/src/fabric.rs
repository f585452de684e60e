//! Fabric surface: best-effort cache operations and topic subscriptions.

use crate::topic::{Handler, TopicTable};
use crate::transport::{Inbound, Transport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

enum Control {
    /// A topic may have lost its last handler; release the wire
    /// subscription if it is still empty.
    ReleaseTopic(String),
}

/// Cache-aside TTL store plus topic pub/sub over one transport.
///
/// All operations are best-effort: transport failures are logged at warn
/// level and degrade to absent reads / dropped writes. Callers must treat a
/// miss as the normal cold case.
pub struct Fabric {
    transport: Arc<dyn Transport>,
    topics: Arc<TopicTable>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl Fabric {
    /// Build the fabric over a transport and its inbound message channel,
    /// spawning the dispatch task that serializes per-topic delivery.
    pub fn new(
        transport: Arc<dyn Transport>,
        mut inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        let topics = Arc::new(TopicTable::new());
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        {
            let topics = Arc::clone(&topics);
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = inbound_rx.recv() => match msg {
                            Some(msg) => topics.dispatch(&msg.topic, &msg.payload),
                            None => break,
                        },
                        cmd = control_rx.recv() => match cmd {
                            Some(Control::ReleaseTopic(topic)) => {
                                // A new subscriber may have arrived since the
                                // release was queued.
                                if !topics.has_subscribers(&topic) {
                                    if let Err(err) = transport.unsubscribe_topic(&topic).await {
                                        warn!(topic, "failed to release wire subscription: {err}");
                                    }
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        Self {
            transport,
            topics,
            control_tx,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.transport.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, "cache get failed: {err}");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) {
        if let Err(err) = self.transport.set(key, value, ttl).await {
            warn!(key, "cache set failed: {err}");
        }
    }

    pub async fn del(&self, key: &str) {
        if let Err(err) = self.transport.del(key).await {
            warn!(key, "cache del failed: {err}");
        }
    }

    pub async fn del_pattern(&self, pattern: &str) {
        if let Err(err) = self.transport.del_pattern(pattern).await {
            warn!(pattern, "cache del_pattern failed: {err}");
        }
    }

    /// Fire-and-forget publish. No delivery guarantee, no acknowledgement.
    pub async fn publish(&self, topic: &str, payload: &[u8]) {
        if let Err(err) = self.transport.publish(topic, payload).await {
            warn!(topic, "publish failed: {err}");
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(key, "cached value failed to decode: {err}");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_vec(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(err) => warn!(key, "cache value failed to encode: {err}"),
        }
    }

    pub async fn publish_json<T: Serialize>(&self, topic: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(raw) => self.publish(topic, &raw).await,
            Err(err) => warn!(topic, "publish payload failed to encode: {err}"),
        }
    }

    /// Register a handler for a topic. The first handler on a topic opens
    /// the wire-level subscription; dropping the returned guard removes the
    /// handler and releases the wire subscription once no handlers remain.
    pub async fn subscribe(&self, topic: &str, handler: Handler) -> Subscription {
        let (id, first) = self.topics.insert(topic, handler);
        if first {
            if let Err(err) = self.transport.subscribe_topic(topic).await {
                // Degraded: the handler stays registered and will receive
                // messages once the transport task re-establishes topics.
                warn!(topic, "wire subscribe failed: {err}");
            }
        }
        Subscription {
            topic: topic.to_string(),
            id,
            topics: Arc::clone(&self.topics),
            control_tx: self.control_tx.clone(),
        }
    }

    /// Number of topics with at least one live handler.
    pub fn topic_count(&self) -> usize {
        self.topics.topic_count()
    }
}

/// Scoped topic subscription. Dropping it removes the handler immediately
/// (no further dispatch to it afterwards) and lazily tears down the wire
/// subscription when the topic has emptied.
pub struct Subscription {
    topic: String,
    id: u64,
    topics: Arc<TopicTable>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.topics.remove(&self.topic, self.id) {
            let _ = self
                .control_tx
                .send(Control::ReleaseTopic(self.topic.clone()));
        }
    }
}
