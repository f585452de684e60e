//! In-process topic → handler registry.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Subscription handler. Errors are isolated per handler: a failure is
/// logged and does not stop delivery to the remaining handlers on the topic.
pub type Handler = Arc<dyn Fn(&[u8]) -> anyhow::Result<()> + Send + Sync>;

/// Topic table mapping each topic to its handlers in registration order.
///
/// Handler insertion/removal for a topic is mutually exclusive with dispatch
/// for that topic (both go through the same map entry), so a handler is
/// never invoked mid-removal.
pub struct TopicTable {
    topics: DashMap<String, Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl TopicTable {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler. Returns its id and whether it is the first
    /// handler on the topic (meaning the wire subscription must be opened).
    pub fn insert(&self, topic: &str, handler: Handler) -> (u64, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        entry.push((id, handler));
        let first = entry.len() == 1;
        (id, first)
    }

    /// Remove a handler. Returns true when the topic has no handlers left
    /// (meaning the wire subscription can be released).
    pub fn remove(&self, topic: &str, id: u64) -> bool {
        let emptied = match self.topics.get_mut(topic) {
            Some(mut entry) => {
                entry.retain(|(hid, _)| *hid != id);
                entry.is_empty()
            }
            None => false,
        };
        if emptied {
            self.topics.remove_if(topic, |_, handlers| handlers.is_empty());
        }
        emptied
    }

    /// Deliver a payload to every handler on the topic, in registration order.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        if let Some(entry) = self.topics.get(topic) {
            for (id, handler) in entry.iter() {
                if let Err(err) = handler(payload) {
                    warn!(topic, handler = id, "subscription handler failed: {err:#}");
                }
            }
        }
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.topics.get(topic).map_or(false, |e| !e.is_empty())
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |e| e.len())
    }

    /// Topics with at least one handler, for resubscription after reconnect.
    pub fn active_topics(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for TopicTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> Handler {
        Arc::new(move |payload| {
            log.lock()
                .unwrap()
                .push(format!("{tag}:{}", String::from_utf8_lossy(payload)));
            Ok(())
        })
    }

    #[test]
    fn dispatch_runs_handlers_in_registration_order() {
        let table = TopicTable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        table.insert("t", recorder(log.clone(), "a"));
        table.insert("t", recorder(log.clone(), "b"));

        table.dispatch("t", b"m");

        assert_eq!(*log.lock().unwrap(), vec!["a:m", "b:m"]);
    }

    #[test]
    fn failing_handler_does_not_block_later_handlers() {
        let table = TopicTable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        table.insert("t", recorder(log.clone(), "first"));
        table.insert("t", Arc::new(|_| anyhow::bail!("boom")));
        table.insert("t", recorder(log.clone(), "last"));

        table.dispatch("t", b"m");

        assert_eq!(*log.lock().unwrap(), vec!["first:m", "last:m"]);
    }

    #[test]
    fn remove_reports_when_topic_empties() {
        let table = TopicTable::new();
        let (a, first) = table.insert("t", Arc::new(|_| Ok(())));
        assert!(first);
        let (b, first) = table.insert("t", Arc::new(|_| Ok(())));
        assert!(!first);

        assert!(!table.remove("t", a));
        assert!(table.remove("t", b));
        assert_eq!(table.topic_count(), 0);
    }
}
