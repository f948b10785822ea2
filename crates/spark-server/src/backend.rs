use std::sync::Arc;

use parking_lot::Mutex;
use spark_config::Webhook;
use spark_contracts::{
    classify, ApiResource, CreateMembership, CreateWebhook, Event, IdentifierKind,
    MembershipRecord, ResourceId, SparkError, SparkResult, UpdateRoom, WebhookRecord,
};
use spark_kernel::{CacheAction, Room};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{decode, encode};
use crate::cache::RoomCache;
use crate::context::SparkContext;
use crate::dispatch::{Dispatcher, Framework};
use crate::model::{Identifier, Message, Person, RoomOccupant};
use crate::translate::Translator;

/// The adapter as the chat framework sees it.
pub struct SparkBackend {
    ctx: SparkContext,
    cache: RoomCache,
    translator: Translator,
    dispatcher: Dispatcher,
    framework: Arc<dyn Framework>,
    owned_webhook: Mutex<Option<String>>,
}

impl SparkBackend {
    pub fn new(ctx: SparkContext, framework: Arc<dyn Framework>) -> Self {
        let cache = RoomCache::new(ctx.api.clone());
        let translator = Translator::new(ctx.clone(), cache.clone());
        let dispatcher = Dispatcher::new(
            ctx.clone(),
            cache.clone(),
            translator.clone(),
            framework.clone(),
        );
        Self {
            ctx,
            cache,
            translator,
            dispatcher,
            framework,
            owned_webhook: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &SparkContext {
        &self.ctx
    }

    pub fn cache(&self) -> &RoomCache {
        &self.cache
    }

    /// Turns user-supplied text into a person, room, or (with `room_id`) an occupant.
    pub async fn build_identifier(
        &self,
        text: &str,
        room_id: Option<&str>,
    ) -> SparkResult<Identifier> {
        debug!(text, ?room_id, "building identifier");
        let person = match classify(text) {
            IdentifierKind::Room => return Ok(Identifier::Room(self.query_room(text).await?)),
            IdentifierKind::Person => Person::with_id(text)?,
            IdentifierKind::Email => Person::with_email(text)?,
            IdentifierKind::Invalid => {
                return Err(SparkError::Validation(format!("invalid identifier: {text}")))
            }
        };
        match room_id {
            Some(room_id) => Ok(Identifier::Occupant(RoomOccupant::new(
                person,
                self.query_room(room_id).await?,
                None,
            ))),
            None => Ok(Identifier::Person(person)),
        }
    }

    pub async fn query_room(&self, room_id: &str) -> SparkResult<Arc<Room>> {
        self.cache.get(&ResourceId::room(room_id)?).await
    }

    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.cache.list()
    }

    pub async fn reload_rooms(&self) -> SparkResult<usize> {
        self.cache.reload().await
    }

    pub async fn send_message(&self, message: &Message) -> SparkResult<()> {
        self.translator.send(message).await
    }

    pub async fn decode_inbound_message(&self, message_id: &str) -> SparkResult<Message> {
        self.translator.decode_inbound(message_id).await
    }

    /// Group messages are answered in their room, direct ones to the sender.
    pub fn build_reply(&self, message: &Message, text: &str) -> SparkResult<Message> {
        let frm = message
            .frm
            .as_ref()
            .ok_or_else(|| SparkError::Validation("message has no sender".to_string()))?;
        let to = if message.is_group() {
            let room = frm.room().ok_or_else(|| {
                SparkError::Validation("group message sender has no room".to_string())
            })?;
            Identifier::Room(room.clone())
        } else {
            frm.clone()
        };
        Ok(Message {
            body: text.to_string(),
            frm: Some(Identifier::Person(self.ctx.bot.person()?)),
            to: Some(to),
        })
    }

    pub fn change_presence(&self, status: &str, message: &str) -> SparkResult<()> {
        debug!(status, message, "presence change requested");
        Err(SparkError::Unsupported(
            "presence is not supported by this backend".to_string(),
        ))
    }

    pub async fn occupants(&self, room_id: &str) -> SparkResult<Vec<RoomOccupant>> {
        let room = self.query_room(room_id).await?;
        let records = self
            .ctx
            .api
            .list(ApiResource::Memberships, &[("roomId", room.id().as_str())])
            .await?;
        records
            .into_iter()
            .map(|raw| {
                let record: MembershipRecord = decode(raw)?;
                RoomOccupant::from_membership(&record, room.clone())
            })
            .collect()
    }

    pub async fn invite(&self, room_id: &str, who: &str) -> SparkResult<()> {
        let room = self.query_room(room_id).await?;
        if room.is_direct() {
            return Err(SparkError::Validation(
                "cannot add a person to a direct room".to_string(),
            ));
        }
        let mut body = CreateMembership {
            room_id: room.id().to_string(),
            person_id: None,
            person_email: None,
        };
        match classify(who) {
            IdentifierKind::Person => body.person_id = Some(who.to_string()),
            IdentifierKind::Email => body.person_email = Some(who.to_string()),
            _ => {
                return Err(SparkError::Validation(format!(
                    "invalid identifier {who}: must be an email address or person id"
                )))
            }
        }
        if room.is_locked() {
            debug!(room_id = %room.id(), "room is locked, checking moderator status");
            let me = self.ctx.bot.id();
            let moderator = self
                .occupants(room_id)
                .await?
                .iter()
                .any(|o| o.person().id() == Some(me) && o.person().is_moderator());
            if !moderator {
                return Err(SparkError::Conflict {
                    body: format!("room {} is locked and the bot is not a moderator", room.id()),
                });
            }
        }
        self.ctx
            .api
            .create(ApiResource::Memberships, encode(&body)?)
            .await?;
        info!(room_id = %room.id(), "invited {who}");
        Ok(())
    }

    pub async fn leave(&self, occupant: &RoomOccupant) -> SparkResult<()> {
        let membership_id = occupant.membership_id().ok_or_else(|| {
            SparkError::Validation("occupant has no membership id".to_string())
        })?;
        self.ctx
            .api
            .delete(ApiResource::Memberships, membership_id)
            .await?;
        if occupant.person().id() == Some(self.ctx.bot.id()) {
            self.cache.invalidate(occupant.room().id());
        }
        Ok(())
    }

    pub async fn destroy_room(&self, room_id: &str) -> SparkResult<()> {
        let id = ResourceId::room(room_id)?;
        self.ctx.api.delete(ApiResource::Rooms, id.as_str()).await?;
        self.cache.invalidate(&id);
        info!(room_id = %id, "room destroyed");
        Ok(())
    }

    /// Renames a group room. The cached entry is evicted, not patched.
    pub async fn set_room_title(&self, room_id: &str, title: &str) -> SparkResult<()> {
        let room = self.query_room(room_id).await?;
        room.check_title_change()?;
        let body = encode(&UpdateRoom {
            title: title.to_string(),
        })?;
        self.ctx
            .api
            .update(ApiResource::Rooms, room.id().as_str(), body)
            .await?;
        self.cache.invalidate(room.id());
        Ok(())
    }

    /// Registers the delivery webhook. Ephemeral webhooks are always created
    /// fresh and remembered for `shutdown`.
    pub async fn ensure_webhook(&self, settings: &Webhook) -> SparkResult<()> {
        if !settings.ephemeral {
            let existing = self.ctx.api.list(ApiResource::Webhooks, &[]).await?;
            for raw in existing {
                let hook: WebhookRecord = decode(raw)?;
                if hook.target_url == settings.target_url {
                    info!(webhook_id = %hook.id, "webhook already registered");
                    return Ok(());
                }
            }
            debug!(target_url = %settings.target_url, "no webhook matches target url");
        }
        let name = if settings.ephemeral {
            format!("{}-{}", settings.name, Uuid::new_v4())
        } else {
            settings.name.clone()
        };
        let body = encode(&CreateWebhook {
            name,
            target_url: settings.target_url.clone(),
            resource: "all".to_string(),
            event: "all".to_string(),
        })?;
        let created: WebhookRecord =
            decode(self.ctx.api.create(ApiResource::Webhooks, body).await?)?;
        info!(webhook_id = %created.id, ephemeral = settings.ephemeral, "webhook created");
        if settings.ephemeral {
            *self.owned_webhook.lock() = Some(created.id);
        }
        Ok(())
    }

    pub async fn remove_owned_webhook(&self) -> SparkResult<()> {
        let owned = self.owned_webhook.lock().take();
        let Some(id) = owned else {
            return Ok(());
        };
        match self.ctx.api.delete(ApiResource::Webhooks, &id).await {
            Ok(()) => {
                info!(webhook_id = %id, "webhook removed");
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn handle_event(&self, event: &Event) -> Option<CacheAction> {
        self.dispatcher.handle(event).await
    }

    /// Warm the cache, register the webhook, tell the framework we are up.
    pub async fn start(&self, settings: &Webhook) -> SparkResult<()> {
        self.cache.reload().await?;
        self.ensure_webhook(settings).await?;
        self.framework.connect_callback();
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Err(err) = self.remove_owned_webhook().await {
            warn!(error = %err, "failed to remove webhook during shutdown");
        }
        self.framework.disconnect_callback();
    }
}

impl std::fmt::Debug for SparkBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparkBackend")
            .field("bot", &self.ctx.bot.id())
            .field("rooms", &self.cache.len())
            .finish()
    }
}
