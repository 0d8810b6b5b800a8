//! In-process broker: peers attached to a shared hub.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use super::{Broker, BrokerEvent};
use crate::error::BrokerResult;

#[derive(Debug)]
struct Peer {
    subscriptions: Mutex<HashSet<String>>,
    events: broadcast::Sender<BrokerEvent>,
}

impl Peer {
    fn subscriptions(&self) -> MutexGuard<'_, HashSet<String>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared message bus connecting [`LocalBroker`]s.
#[derive(Debug, Default)]
pub struct BrokerHub {
    peers: Mutex<Vec<Weak<Peer>>>,
}

impl BrokerHub {
    /// Create an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new subscriber whose event buffer holds `capacity` events.
    pub fn attach(self: &Arc<Self>, capacity: usize) -> LocalBroker {
        let (events, _) = broadcast::channel(capacity.max(1));
        let peer = Arc::new(Peer {
            subscriptions: Mutex::new(HashSet::new()),
            events,
        });
        self.peers().push(Arc::downgrade(&peer));
        LocalBroker {
            hub: Arc::clone(self),
            peer,
        }
    }

    /// Number of live subscribers.
    pub fn peer_count(&self) -> usize {
        let mut peers = self.peers();
        peers.retain(|p| p.strong_count() > 0);
        peers.len()
    }

    fn deliver(&self, channel: &str, payload: &str) -> usize {
        let live: Vec<Arc<Peer>> = {
            let mut peers = self.peers();
            peers.retain(|p| p.strong_count() > 0);
            peers.iter().filter_map(Weak::upgrade).collect()
        };

        let mut receivers = 0;
        for peer in live {
            if !peer.subscriptions().contains(channel) {
                continue;
            }
            receivers += 1;
            // No receiver just means nobody is listening yet.
            let _ = peer.events.send(BrokerEvent::Message {
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        }
        trace!(channel, receivers, "Delivered broker message");
        receivers
    }

    fn peers(&self) -> MutexGuard<'_, Vec<Weak<Peer>>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process broker attached to a [`BrokerHub`].
#[derive(Debug)]
pub struct LocalBroker {
    hub: Arc<BrokerHub>,
    peer: Arc<Peer>,
}

impl LocalBroker {
    /// A broker on a private hub (single-process deployments).
    pub fn standalone(capacity: usize) -> Self {
        BrokerHub::new().attach(capacity)
    }

    /// The hub this broker publishes through.
    pub fn hub(&self) -> &Arc<BrokerHub> {
        &self.hub
    }

    /// Channels this broker listens on, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.peer.subscriptions().iter().cloned().collect();
        channels.sort();
        channels
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, channel: &str, payload: &str) -> BrokerResult<usize> {
        Ok(self.hub.deliver(channel, payload))
    }

    async fn subscribe(&self, channel: &str) -> BrokerResult<()> {
        let count = {
            let mut subscriptions = self.peer.subscriptions();
            if !subscriptions.insert(channel.to_string()) {
                return Ok(());
            }
            subscriptions.len()
        };
        let _ = self.peer.events.send(BrokerEvent::Subscribed {
            channel: channel.to_string(),
            count,
        });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> BrokerResult<()> {
        let count = {
            let mut subscriptions = self.peer.subscriptions();
            if !subscriptions.remove(channel) {
                return Ok(());
            }
            subscriptions.len()
        };
        let _ = self.peer.events.send(BrokerEvent::Unsubscribed {
            channel: channel.to_string(),
            count,
        });
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.peer.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribed_peers_only() {
        let hub = BrokerHub::new();
        let a = hub.attach(16);
        let b = hub.attach(16);
        let mut a_events = a.events();
        let mut b_events = b.events();

        a.subscribe("todo").await.unwrap();
        assert!(matches!(
            a_events.recv().await.unwrap(),
            BrokerEvent::Subscribed { count: 1, .. }
        ));

        let receivers = b.publish("todo", "{}").await.unwrap();
        assert_eq!(receivers, 1);
        assert_eq!(
            a_events.recv().await.unwrap(),
            BrokerEvent::Message {
                channel: "todo".into(),
                payload: "{}".into()
            }
        );
        assert!(b_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let broker = LocalBroker::standalone(16);
        let mut events = broker.events();

        broker.subscribe("todo").await.unwrap();
        broker.subscribe("todo").await.unwrap();
        broker.subscribe("todo:1").await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), BrokerEvent::Subscribed { count: 1, .. }));
        assert!(matches!(events.recv().await.unwrap(), BrokerEvent::Subscribed { count: 2, .. }));
        assert!(events.try_recv().is_err());
        assert_eq!(broker.subscriptions(), vec!["todo", "todo:1"]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = LocalBroker::standalone(16);
        broker.subscribe("todo").await.unwrap();
        broker.unsubscribe("todo").await.unwrap();
        broker.unsubscribe("todo").await.unwrap();

        assert_eq!(broker.publish("todo", "{}").await.unwrap(), 0);
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn dropped_brokers_leave_the_hub() {
        let hub = BrokerHub::new();
        let a = hub.attach(4);
        {
            let _b = hub.attach(4);
            assert_eq!(hub.peer_count(), 2);
        }
        assert_eq!(hub.peer_count(), 1);
        drop(a);
        assert_eq!(hub.peer_count(), 0);
    }
}
