use std::sync::Arc;

use spark_contracts::{Event, SparkResult};
use spark_kernel::{plan_event, CacheAction};
use tracing::{debug, info, warn};

use crate::cache::RoomCache;
use crate::context::SparkContext;
use crate::model::Message;
use crate::translate::Translator;

/// The hosting chat framework, seen from the adapter.
pub trait Framework: Send + Sync {
    fn callback_message(&self, message: Message);

    fn connect_callback(&self) {}

    fn disconnect_callback(&self) {}
}

/// Framework used by the standalone binary: logs what it would have handled.
#[derive(Debug, Default)]
pub struct TracingFramework;

impl Framework for TracingFramework {
    fn callback_message(&self, message: Message) {
        info!(
            from = ?message.frm.as_ref().map(ToString::to_string),
            direct = message.is_direct(),
            body = %message.body,
            "inbound message"
        );
    }

    fn connect_callback(&self) {
        info!("connected");
    }

    fn disconnect_callback(&self) {
        info!("disconnected");
    }
}

/// Applies webhook events to the room cache and forwards inbound messages.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: SparkContext,
    cache: RoomCache,
    translator: Translator,
    framework: Arc<dyn Framework>,
}

impl Dispatcher {
    pub fn new(
        ctx: SparkContext,
        cache: RoomCache,
        translator: Translator,
        framework: Arc<dyn Framework>,
    ) -> Self {
        Self {
            ctx,
            cache,
            translator,
            framework,
        }
    }

    /// Plans and applies one event, returning the action taken.
    pub async fn dispatch(&self, event: &Event) -> SparkResult<CacheAction> {
        let action = plan_event(event, self.ctx.bot.id())?;
        match &action {
            CacheAction::DeliverMessage { message_id } => {
                let message = self.translator.decode_inbound(message_id).await?;
                self.framework.callback_message(message);
            }
            CacheAction::SuppressEcho => debug!("ignoring own message"),
            CacheAction::Hydrate { room_id } => {
                info!(room_id = %room_id, "joined room");
                self.cache.get(room_id).await?;
            }
            CacheAction::Put(room) => {
                self.cache.put(room.clone());
            }
            CacheAction::Invalidate { room_id } => {
                info!(room_id = %room_id, "evicting room");
                self.cache.invalidate(room_id);
            }
            CacheAction::Ignore { reason } => debug!(
                resource = ?event.resource,
                verb = ?event.verb,
                reason,
                "event not handled"
            ),
        }
        Ok(action)
    }

    /// Like `dispatch`, but a failure is logged and swallowed so one bad event
    /// cannot stop the stream.
    pub async fn handle(&self, event: &Event) -> Option<CacheAction> {
        match self.dispatch(event).await {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(
                    resource = ?event.resource,
                    verb = ?event.verb,
                    error = %err,
                    "event processing failed"
                );
                None
            }
        }
    }
}
