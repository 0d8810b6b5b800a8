//! Request dispatcher.
//!
//! Turns one inbound [`Packet`] into one reply: resolve the method, run the
//! type's pre-hooks, execute, run post-hooks, then shape the reply with the
//! notification name and the caller's `requestId`.

use std::sync::Arc;

use sync_types::channel::channel_type;
use sync_types::{ConnectionId, Method, Model, Options, Packet, Record, SyncError};

use crate::engine::{resolve_channel, resolve_type, Engine};
use crate::router::ChannelRouter;
use crate::schema::{run_chain, HookContext, SchemaRegistry, Stage};
use crate::server::ServerMetrics;

/// Routes requests to the engine or the channel router.
pub struct Dispatcher {
    engine: Arc<Engine>,
    router: Arc<ChannelRouter>,
    schemas: Arc<SchemaRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("schemas", &self.schemas.types())
            .finish_non_exhaustive()
    }
}

/// Channel a membership request addresses.
///
/// A bare `options.channel` needs no type; otherwise the channel is derived
/// from the record's type and id.
fn membership_channel(record: &Record, options: &Options) -> Result<String, SyncError> {
    if let Some(channel) = options.channel.as_deref().filter(|c| !c.is_empty()) {
        return Ok(channel.to_string());
    }
    let record_type = resolve_type(record, options)?;
    Ok(resolve_channel(&record_type, record, options))
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        engine: Arc<Engine>,
        router: Arc<ChannelRouter>,
        schemas: Arc<SchemaRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            engine,
            router,
            schemas,
            metrics,
        }
    }

    /// Process one request.
    ///
    /// `connection` is required for `subscribe` and `unsubscribe`; requests
    /// made on behalf of the server itself pass `None`.
    pub async fn process(
        &self,
        connection: Option<ConnectionId>,
        packet: Packet,
    ) -> Result<Packet, SyncError> {
        let method: Method = packet.options.method.parse()?;

        let record_type = packet
            .options
            .record_type
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                packet
                    .model
                    .as_record()
                    .and_then(|r| r.record_type().map(str::to_string))
            });
        let schema = record_type
            .as_deref()
            .and_then(|t| self.schemas.get(t))
            .cloned();

        let mut ctx = HookContext {
            connection,
            method,
            packet,
            outcome: None,
        };

        if let Some(schema) = &schema {
            run_chain(schema.hooks(Stage::Pre, method), &mut ctx).await?;
        }

        let (model, channel) = self.execute(method, connection, &ctx.packet).await?;
        ctx.outcome = Some(model);

        if let Some(schema) = &schema {
            run_chain(schema.hooks(Stage::Post, method), &mut ctx).await?;
        }

        self.metrics.record(method);

        let HookContext {
            packet, outcome, ..
        } = ctx;
        let record_type = packet
            .options
            .record_type
            .clone()
            .or(record_type)
            .or_else(|| channel.as_deref().map(|c| channel_type(c).to_string()));

        Ok(Packet {
            model: outcome.unwrap_or_default(),
            options: Options {
                method: method.notification_name().to_string(),
                record_type,
                channel,
                request_id: packet.options.request_id,
                ..Options::default()
            },
            error: None,
        })
    }

    /// Run the operation; returns the outcome and the channel it addressed.
    async fn execute(
        &self,
        method: Method,
        connection: Option<ConnectionId>,
        packet: &Packet,
    ) -> Result<(Model, Option<String>), SyncError> {
        let options = &packet.options;
        let record = match &packet.model {
            Model::One(record) => record.clone(),
            Model::Many(_) => {
                return Err(SyncError::InvalidPacket(format!(
                    "{method} takes a single record"
                )))
            }
        };

        match method {
            Method::Create => {
                let created = self.engine.create(record, options).await?;
                let channel = self.outcome_channel(&created, options);
                Ok((Model::One(created), channel))
            }
            Method::Read => {
                let channel = resolve_type(&record, options)
                    .ok()
                    .map(|t| resolve_channel(&t, &record, options));
                let model = self.engine.read(&record, options).await?;
                Ok((model, channel))
            }
            Method::Update => {
                let updated = self.engine.update(record, options).await?;
                let channel = self.outcome_channel(&updated, options);
                Ok((Model::One(updated), channel))
            }
            Method::Delete => {
                let deleted = self.engine.delete(record, options).await?;
                let channel = self.outcome_channel(&deleted, options);
                Ok((Model::One(deleted), channel))
            }
            Method::Publish => {
                let published = self.engine.publish(record, options).await?;
                let channel = self.outcome_channel(&published, options);
                Ok((Model::One(published), channel))
            }
            Method::Subscribe | Method::Unsubscribe => {
                let connection = connection.ok_or_else(|| {
                    SyncError::InvalidPacket(format!("{method} requires a connection"))
                })?;
                let channel = membership_channel(&record, options)?;
                if method == Method::Subscribe {
                    self.router.subscribe(connection, &channel).await?;
                } else {
                    self.router.unsubscribe(connection, &channel).await?;
                }
                Ok((Model::default(), Some(channel)))
            }
        }
    }

    fn outcome_channel(&self, record: &Record, options: &Options) -> Option<String> {
        resolve_type(record, options)
            .ok()
            .map(|t| resolve_channel(&t, record, options))
    }
}
