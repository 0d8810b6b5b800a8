//! Pub/sub bridge between the engine, the broker and local connections.
//!
//! Outbound, a notification is published on its channel and, when that is
//! an instance channel, on the record type's channel too, so collection
//! subscribers see changes to every member. Inbound, broker deliveries are
//! parsed, stamped with the channel they arrived on and broadcast to the
//! connections that joined it.

use std::sync::Arc;

use sync_types::{Options, Packet, SyncError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::broker::{Broker, BrokerEvent};
use crate::router::ChannelRouter;

/// Publishes notifications and feeds broker deliveries to the router.
pub struct PubSubBridge {
    broker: Arc<dyn Broker>,
    router: Arc<ChannelRouter>,
    announce_membership: bool,
}

impl std::fmt::Debug for PubSubBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubBridge")
            .field("announce_membership", &self.announce_membership)
            .finish_non_exhaustive()
    }
}

impl PubSubBridge {
    /// Create a bridge.
    ///
    /// With `announce_membership`, broker subscribe/unsubscribe notices are
    /// forwarded to the channel's members as `subscribed`/`unsubscribed`.
    pub fn new(
        broker: Arc<dyn Broker>,
        router: Arc<ChannelRouter>,
        announce_membership: bool,
    ) -> Self {
        Self {
            broker,
            router,
            announce_membership,
        }
    }

    /// Publish `packet` on `channel`, and on `record_type` when different.
    ///
    /// Returns the total number of broker subscribers reached.
    pub async fn publish(
        &self,
        channel: &str,
        record_type: &str,
        packet: &Packet,
    ) -> Result<usize, SyncError> {
        let payload = packet.to_json()?;
        let mut receivers = self.broker.publish(channel, &payload).await?;
        if channel != record_type {
            receivers += self.broker.publish(record_type, &payload).await?;
        }
        tracing::debug!(
            "Published {} on {} (type {}) to {} subscribers",
            packet.options.method,
            channel,
            record_type,
            receivers
        );
        Ok(receivers)
    }

    /// Start forwarding broker events to local connections.
    ///
    /// The event receiver is taken before this returns, so nothing
    /// published afterwards is missed.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.broker.events();
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        bridge.handle_event(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Bridge lagged behind broker, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Broker event stream closed, bridge stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Route one broker event. Returns how many connections it reached.
    pub async fn handle_event(&self, event: BrokerEvent) -> usize {
        match event {
            BrokerEvent::Message { channel, payload } => {
                let mut packet = match Packet::from_json(&payload) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!("Dropping unparseable payload on {}: {}", channel, e);
                        return 0;
                    }
                };
                packet.options.channel = Some(channel.clone());
                self.router.broadcast(&channel, &packet).await
            }
            BrokerEvent::Subscribed { channel, count } if self.announce_membership => {
                tracing::trace!("Announcing subscription to {} ({} channels)", channel, count);
                self.announce("subscribed", channel).await
            }
            BrokerEvent::Unsubscribed { channel, count } if self.announce_membership => {
                tracing::trace!("Announcing unsubscription from {} ({} channels)", channel, count);
                self.announce("unsubscribed", channel).await
            }
            BrokerEvent::Subscribed { .. } | BrokerEvent::Unsubscribed { .. } => 0,
        }
    }

    async fn announce(&self, method: &str, channel: String) -> usize {
        let packet = Packet {
            options: Options {
                method: method.to_string(),
                channel: Some(channel.clone()),
                ..Options::default()
            },
            ..Packet::default()
        };
        self.router.broadcast(&channel, &packet).await
    }
}
