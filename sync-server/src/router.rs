//! Channel router: which connections listen on which channels.
//!
//! The router owns process-local membership and talks to the broker so
//! that the process is subscribed to a channel exactly while at least one
//! local connection has joined it. Membership changes hold one lock across
//! the broker round-trip, so join/leave of the same channel never race.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use sync_types::{ConnectionId, Packet};
use tokio::sync::{mpsc, Mutex};

use crate::broker::Broker;
use crate::error::BrokerResult;

#[derive(Debug, Default)]
struct Membership {
    /// Channel → joined connections.
    channels: HashMap<String, HashSet<ConnectionId>>,
    /// Connection → joined channels.
    joined: HashMap<ConnectionId, HashSet<String>>,
}

/// Routes broadcast packets to the connections that joined a channel.
pub struct ChannelRouter {
    broker: Arc<dyn Broker>,
    membership: Mutex<Membership>,
    /// Outbound queues of live connections.
    connections: DashMap<ConnectionId, mpsc::Sender<Packet>>,
    /// Packets dropped because a connection's queue was full or closed.
    dropped: AtomicU64,
}

impl std::fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRouter")
            .field("connections", &self.connections.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ChannelRouter {
    /// Create a router subscribing through `broker`.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            membership: Mutex::new(Membership::default()),
            connections: DashMap::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a connection's outbound queue.
    pub fn register(&self, connection: ConnectionId, outbound: mpsc::Sender<Packet>) {
        self.connections.insert(connection, outbound);
    }

    /// Join `channel`. Returns `false` if the connection had already joined.
    ///
    /// The first local join subscribes the process at the broker. A broker
    /// failure leaves membership unchanged.
    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        channel: &str,
    ) -> BrokerResult<bool> {
        let mut membership = self.membership.lock().await;

        let already = membership
            .joined
            .get(&connection)
            .is_some_and(|channels| channels.contains(channel));
        if already {
            return Ok(false);
        }

        if !membership.channels.contains_key(channel) {
            self.broker.subscribe(channel).await?;
            tracing::debug!("Subscribed process to channel {}", channel);
        }

        membership
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(connection);
        membership
            .joined
            .entry(connection)
            .or_default()
            .insert(channel.to_string());

        tracing::debug!("{} joined channel {}", connection, channel);
        Ok(true)
    }

    /// Leave `channel`. Returns `false` if the connection was not a member.
    ///
    /// The last local leave unsubscribes the process at the broker. A broker
    /// failure leaves membership unchanged so the leave can be retried.
    pub async fn unsubscribe(
        &self,
        connection: ConnectionId,
        channel: &str,
    ) -> BrokerResult<bool> {
        let mut membership = self.membership.lock().await;

        let is_member = membership
            .joined
            .get(&connection)
            .is_some_and(|channels| channels.contains(channel));
        if !is_member {
            return Ok(false);
        }

        self.leave(&mut membership, connection, channel).await?;
        if let Some(channels) = membership.joined.get_mut(&connection) {
            channels.remove(channel);
            if channels.is_empty() {
                membership.joined.remove(&connection);
            }
        }

        tracing::debug!("{} left channel {}", connection, channel);
        Ok(true)
    }

    /// Drop a connection: forget its queue and leave every joined channel.
    ///
    /// A channel whose broker unsubscribe fails keeps an empty entry, so a
    /// later join does not subscribe twice and [`Self::release_idle`] can
    /// retry.
    pub async fn disconnect(&self, connection: ConnectionId) {
        self.connections.remove(&connection);

        let mut membership = self.membership.lock().await;
        let Some(channels) = membership.joined.remove(&connection) else {
            return;
        };
        for channel in channels {
            if let Err(e) = self.leave(&mut membership, connection, &channel).await {
                if let Some(members) = membership.channels.get_mut(&channel) {
                    members.remove(&connection);
                }
                tracing::warn!("Failed to unsubscribe from {} on disconnect: {}", channel, e);
            }
        }
        tracing::debug!("{} disconnected", connection);
    }

    /// Retry broker unsubscribes for channels nobody has joined anymore.
    ///
    /// Returns how many channels were released.
    pub async fn release_idle(&self) -> usize {
        let mut membership = self.membership.lock().await;
        let idle: Vec<String> = membership
            .channels
            .iter()
            .filter(|(_, members)| members.is_empty())
            .map(|(channel, _)| channel.clone())
            .collect();

        let mut released = 0;
        for channel in idle {
            match self.broker.unsubscribe(&channel).await {
                Ok(()) => {
                    membership.channels.remove(&channel);
                    released += 1;
                }
                Err(e) => tracing::warn!("Failed to release channel {}: {}", channel, e),
            }
        }
        released
    }

    /// Remove `connection` from `channel`, unsubscribing the process first
    /// when it is the last member. Nothing changes if the broker fails.
    async fn leave(
        &self,
        membership: &mut Membership,
        connection: ConnectionId,
        channel: &str,
    ) -> BrokerResult<()> {
        let Some(members) = membership.channels.get(channel) else {
            return Ok(());
        };
        let last = members.iter().all(|member| *member == connection);

        if last {
            self.broker.unsubscribe(channel).await?;
            membership.channels.remove(channel);
            tracing::debug!("Unsubscribed process from channel {}", channel);
        } else if let Some(members) = membership.channels.get_mut(channel) {
            members.remove(&connection);
        }
        Ok(())
    }

    /// Connections that joined `channel`.
    pub async fn members(&self, channel: &str) -> Vec<ConnectionId> {
        let membership = self.membership.lock().await;
        membership
            .channels
            .get(channel)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Channels `connection` joined.
    pub async fn joined(&self, connection: ConnectionId) -> Vec<String> {
        let membership = self.membership.lock().await;
        let mut channels: Vec<String> = membership
            .joined
            .get(&connection)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Send `packet` to every member of `channel` without waiting.
    ///
    /// Members whose queue is full miss the packet. Returns how many
    /// members it was queued for.
    pub async fn broadcast(&self, channel: &str, packet: &Packet) -> usize {
        let members = self.members(channel).await;
        let mut delivered = 0;
        for member in members {
            if self.try_send(member, packet.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Queue `packet` for one connection without waiting.
    pub fn try_send(&self, connection: ConnectionId, packet: Packet) -> bool {
        let Some(outbound) = self.connections.get(&connection).map(|c| c.value().clone()) else {
            return false;
        };
        match outbound.try_send(packet) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Outbound queue full for {}, dropping packet", connection);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of channels with at least one local member.
    pub async fn channel_count(&self) -> usize {
        let membership = self.membership.lock().await;
        membership
            .channels
            .values()
            .filter(|members| !members.is_empty())
            .count()
    }

    /// Packets dropped since start.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
