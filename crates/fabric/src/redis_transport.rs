//! Redis/Valkey transport.
//!
//! Key/value commands go through a lazily-established [`ConnectionManager`]
//! (which retries internally), so a backend that is down at process startup
//! costs a warn log per operation, never a failed startup. Pub/sub runs on
//! its own connection, owned by a background task that reconnects with
//! doubling delay and re-subscribes the desired topic set after each
//! reconnect.

use crate::error::{FabricError, Result};
use crate::transport::{Inbound, Transport};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, warn};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

enum PubSubCmd {
    Subscribe(String),
    Unsubscribe(String),
}

pub struct RedisTransport {
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
    pubsub_tx: mpsc::UnboundedSender<PubSubCmd>,
}

impl RedisTransport {
    /// Create the transport and its inbound message channel.
    ///
    /// No connection is made here; kv connects on first use and pub/sub
    /// connects once the first topic is subscribed.
    pub fn connect(url: &str) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Inbound>)> {
        let client = redis::Client::open(url)?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (pubsub_tx, pubsub_rx) = mpsc::unbounded_channel();

        tokio::spawn(pubsub_task(client.clone(), pubsub_rx, inbound_tx));

        let transport = Arc::new(Self {
            client,
            manager: OnceCell::new(),
            pubsub_tx,
        });
        Ok((transport, inbound_rx))
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                info!("connecting to cache store");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(manager.clone())
    }

    fn send_cmd(&self, cmd: PubSubCmd) -> Result<()> {
        self.pubsub_tx
            .send(cmd)
            .map_err(|_| FabricError::ChannelClosed)
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut con = self.conn().await?;
        Ok(con.get(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut con = self.conn().await?;
        match ttl {
            Some(ttl) => {
                let _: () = con.set_ex(key, value, ttl.as_secs()).await?;
            }
            None => {
                let _: () = con.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut con = self.conn().await?;
        let _: () = con.del(key).await?;
        Ok(())
    }

    async fn del_pattern(&self, pattern: &str) -> Result<()> {
        let mut con = self.conn().await?;
        let keys: Vec<String> = con.keys(pattern).await?;
        if !keys.is_empty() {
            let _: () = con.del(keys).await?;
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut con = self.conn().await?;
        let _: () = con.publish(topic, payload).await?;
        Ok(())
    }

    async fn subscribe_topic(&self, topic: &str) -> Result<()> {
        self.send_cmd(PubSubCmd::Subscribe(topic.to_string()))
    }

    async fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        self.send_cmd(PubSubCmd::Unsubscribe(topic.to_string()))
    }
}

/// Owns the pub/sub connection. Reconnects with doubling delay and replays
/// the desired topic set after each reconnect.
async fn pubsub_task(
    client: redis::Client,
    mut cmd_rx: mpsc::UnboundedReceiver<PubSubCmd>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
) {
    let mut desired: HashSet<String> = HashSet::new();
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        // Nothing to subscribe yet: stay disconnected until a topic appears.
        while desired.is_empty() {
            match cmd_rx.recv().await {
                Some(cmd) => apply_cmd(&mut desired, cmd, None).await,
                None => return,
            }
        }

        match client.get_async_pubsub().await {
            Ok(pubsub) => {
                delay = INITIAL_RECONNECT_DELAY;
                match run_pubsub(pubsub, &mut desired, &mut cmd_rx, &inbound_tx).await {
                    Ok(()) => {
                        debug!("pubsub task shutting down");
                        return;
                    }
                    Err(err) => {
                        warn!("pubsub connection lost: {err}; reconnecting in {delay:?}");
                    }
                }
            }
            Err(err) => {
                warn!("pubsub connect failed: {err}; retrying in {delay:?}");
            }
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
}

async fn apply_cmd(
    desired: &mut HashSet<String>,
    cmd: PubSubCmd,
    sink: Option<&mut redis::aio::PubSubSink>,
) {
    match cmd {
        PubSubCmd::Subscribe(topic) => {
            if desired.insert(topic.clone()) {
                if let Some(sink) = sink {
                    if let Err(err) = sink.subscribe(&topic).await {
                        warn!(topic, "wire subscribe failed: {err}");
                    }
                }
            }
        }
        PubSubCmd::Unsubscribe(topic) => {
            if desired.remove(&topic) {
                if let Some(sink) = sink {
                    if let Err(err) = sink.unsubscribe(&topic).await {
                        warn!(topic, "wire unsubscribe failed: {err}");
                    }
                }
            }
        }
    }
}

/// Drive one pub/sub connection until it drops (`Err`) or the command
/// channel closes (`Ok`).
async fn run_pubsub(
    pubsub: redis::aio::PubSub,
    desired: &mut HashSet<String>,
    cmd_rx: &mut mpsc::UnboundedReceiver<PubSubCmd>,
    inbound_tx: &mpsc::UnboundedSender<Inbound>,
) -> Result<()> {
    let (mut sink, mut stream) = pubsub.split();

    for topic in desired.iter() {
        sink.subscribe(topic).await?;
    }
    info!("pubsub connected ({} topics)", desired.len());

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => apply_cmd(desired, cmd, Some(&mut sink)).await,
                None => return Ok(()),
            },
            msg = stream.next() => match msg {
                Some(msg) => {
                    let inbound = Inbound {
                        topic: msg.get_channel_name().to_string(),
                        payload: msg.get_payload_bytes().to_vec(),
                    };
                    if inbound_tx.send(inbound).is_err() {
                        return Ok(());
                    }
                }
                None => return Err(FabricError::Unavailable("pubsub stream ended".into())),
            },
        }
    }
}
