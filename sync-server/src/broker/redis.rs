//! Redis broker: fan-out across processes through PUBLISH/SUBSCRIBE.
//!
//! Publishing and subscribing use separate connections, since a Redis
//! connection in subscriber mode accepts no other commands. The subscriber
//! connection is owned by one task that applies subscribe/unsubscribe
//! commands and forwards deliveries as [`BrokerEvent`]s.

use std::collections::HashSet;
use std::pin::pin;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{Client, Msg, RedisResult};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::{Broker, BrokerEvent};
use crate::error::{BrokerError, BrokerResult};

/// Pending subscriber commands before callers start waiting.
const COMMAND_BUFFER: usize = 64;

enum Command {
    Subscribe {
        channel: String,
        done: oneshot::Sender<RedisResult<()>>,
    },
    Unsubscribe {
        channel: String,
        done: oneshot::Sender<RedisResult<()>>,
    },
}

/// Broker backed by a Redis server.
#[derive(Clone)]
pub struct RedisBroker {
    publisher: MultiplexedConnection,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<BrokerEvent>,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connect to the Redis server at `url` (`redis://host:port/db`).
    ///
    /// `capacity` bounds the event buffer, as for
    /// [`super::BrokerHub::attach`].
    pub async fn connect(url: &str, capacity: usize) -> BrokerResult<Self> {
        let client = Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        let subscriber = client.get_async_pubsub().await?;

        let (events, _) = broadcast::channel(capacity.max(1));
        let (commands, inbox) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run_subscriber(subscriber, inbox, events.clone()));

        debug!("Connected Redis broker");
        Ok(Self {
            publisher,
            commands,
            events,
        })
    }

    async fn send(&self, command: Command, done: oneshot::Receiver<RedisResult<()>>) -> BrokerResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BrokerError::Closed)?;
        done.await.map_err(|_| BrokerError::Closed)??;
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> BrokerResult<usize> {
        let mut conn = self.publisher.clone();
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        trace!(channel, receivers, "Published to Redis");
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> BrokerResult<()> {
        let (done, wait) = oneshot::channel();
        let command = Command::Subscribe {
            channel: channel.to_string(),
            done,
        };
        self.send(command, wait).await
    }

    async fn unsubscribe(&self, channel: &str) -> BrokerResult<()> {
        let (done, wait) = oneshot::channel();
        let command = Command::Unsubscribe {
            channel: channel.to_string(),
            done,
        };
        self.send(command, wait).await
    }

    fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }
}

/// Own the subscriber connection until the broker is dropped or Redis
/// closes the connection.
async fn run_subscriber(
    mut pubsub: PubSub,
    mut inbox: mpsc::Receiver<Command>,
    events: broadcast::Sender<BrokerEvent>,
) {
    let mut subscriptions: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            command = inbox.recv() => {
                let Some(command) = command else {
                    debug!("Redis broker dropped, closing subscriber");
                    break;
                };
                apply(&mut pubsub, &mut subscriptions, &events, command).await;
            }
            message = async {
                let mut stream = pin!(pubsub.on_message());
                stream.next().await
            } => {
                let Some(message) = message else {
                    warn!("Redis subscriber connection closed");
                    break;
                };
                forward(&events, &message);
            }
        }
    }
}

async fn apply(
    pubsub: &mut PubSub,
    subscriptions: &mut HashSet<String>,
    events: &broadcast::Sender<BrokerEvent>,
    command: Command,
) {
    match command {
        Command::Subscribe { channel, done } => {
            if subscriptions.contains(&channel) {
                let _ = done.send(Ok(()));
                return;
            }
            let result = pubsub.subscribe(&channel).await;
            if result.is_ok() {
                subscriptions.insert(channel.clone());
                let _ = events.send(BrokerEvent::Subscribed {
                    channel,
                    count: subscriptions.len(),
                });
            }
            let _ = done.send(result);
        }
        Command::Unsubscribe { channel, done } => {
            if !subscriptions.contains(&channel) {
                let _ = done.send(Ok(()));
                return;
            }
            let result = pubsub.unsubscribe(&channel).await;
            if result.is_ok() {
                subscriptions.remove(&channel);
                let _ = events.send(BrokerEvent::Unsubscribed {
                    channel,
                    count: subscriptions.len(),
                });
            }
            let _ = done.send(result);
        }
    }
}

fn forward(events: &broadcast::Sender<BrokerEvent>, message: &Msg) {
    let channel = message.get_channel_name().to_string();
    match message.get_payload::<String>() {
        Ok(payload) => {
            // No receiver just means nobody is listening yet.
            let _ = events.send(BrokerEvent::Message { channel, payload });
        }
        Err(e) => warn!("Dropping non-text payload on {}: {}", channel, e),
    }
}
