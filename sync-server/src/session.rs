//! Per-connection WebSocket session.
//!
//! One task per connection multiplexes inbound frames and the connection's
//! outbound notification queue. Each text frame carries one request packet
//! and gets exactly one reply, sent directly on the socket. When the socket
//! closes the connection leaves every channel it joined.

use crate::server::SyncServer;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use sync_types::Packet;

/// A per-connection session.
pub struct Session {
    server: Arc<SyncServer>,
    socket: WebSocket,
}

async fn send_packet(
    sender: &mut SplitSink<WebSocket, Message>,
    packet: &Packet,
) -> Result<(), axum::Error> {
    match packet.to_json() {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            tracing::warn!("Failed to serialize outbound packet: {}", e);
            Ok(())
        }
    }
}

impl Session {
    /// Create a new session for an upgraded socket.
    pub fn new(server: Arc<SyncServer>, socket: WebSocket) -> Self {
        Self { server, socket }
    }

    /// Run the session until the socket closes.
    pub async fn run(self) {
        let Self { server, socket } = self;
        let (id, mut outbound) = server.connect();
        let (mut sender, mut receiver) = socket.split();
        tracing::info!("New connection {}", id);

        loop {
            tokio::select! {
                frame = receiver.next() => {
                    let reply = match frame {
                        Some(Ok(Message::Text(text))) => server.handle_text(id, &text).await,
                        Some(Ok(Message::Binary(data))) => server.reject_binary(id, data.len()),
                        Some(Ok(Message::Close(_))) | None => break,
                        // Pings are answered by the socket itself.
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::debug!("WebSocket error on {}: {}", id, e);
                            break;
                        }
                    };
                    if let Err(e) = send_packet(&mut sender, &reply).await {
                        tracing::debug!("Failed to reply on {}: {}", id, e);
                        break;
                    }
                }

                packet = outbound.recv() => {
                    let Some(packet) = packet else { break };
                    if let Err(e) = send_packet(&mut sender, &packet).await {
                        tracing::debug!("Failed to notify {}: {}", id, e);
                        break;
                    }
                }
            }
        }

        server.disconnect(id).await;
        tracing::info!("Connection {} closed", id);
    }
}
