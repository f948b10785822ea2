use spark_contracts::{
    ApiResource, MessageRecord, OutboundMessage, ResourceId, SparkError, SparkResult,
};
use spark_kernel::{outbound_message, resolve_destination, strip_mention, AddressHints};
use tracing::debug;

use crate::api::{decode, encode};
use crate::cache::RoomCache;
use crate::context::SparkContext;
use crate::model::{Identifier, Message, Person, RoomOccupant};

/// Converts between framework messages and remote message payloads.
#[derive(Clone)]
pub struct Translator {
    ctx: SparkContext,
    cache: RoomCache,
}

impl Translator {
    pub fn new(ctx: SparkContext, cache: RoomCache) -> Self {
        Self { ctx, cache }
    }

    pub fn outbound(&self, message: &Message) -> SparkResult<OutboundMessage> {
        let to = message
            .to
            .as_ref()
            .ok_or_else(|| SparkError::Validation("message has no destination".to_string()))?;
        let person = to.person();
        let hints = AddressHints {
            direct: message.is_direct(),
            room_id: to.room().map(|room| room.id()),
            person_id: person.and_then(Person::id),
            person_email: person.and_then(Person::email),
        };
        let destination = resolve_destination(&hints)?;
        Ok(outbound_message(&message.body, &destination))
    }

    pub async fn send(&self, message: &Message) -> SparkResult<()> {
        let payload = self.outbound(message)?;
        debug!(
            to = ?message.to.as_ref().map(ToString::to_string),
            direct = message.is_direct(),
            "sending message"
        );
        self.ctx
            .api
            .create(ApiResource::Messages, encode(&payload)?)
            .await?;
        Ok(())
    }

    /// Fetch a message announced by a webhook and resolve both ends through
    /// the room cache. In a direct room the message is addressed to the bot
    /// as an occupant of that room, so replies go to the person.
    pub async fn decode_inbound(&self, message_id: &str) -> SparkResult<Message> {
        let record: MessageRecord =
            decode(self.ctx.api.get(ApiResource::Messages, message_id).await?)?;
        let room = self.cache.get(&ResourceId::room(&record.room_id)?).await?;

        let mut sender = Person::with_id(&record.person_id)?;
        if let Some(email) = record.person_email.as_deref() {
            sender.set_email(email)?;
        }
        let frm = Identifier::Occupant(RoomOccupant::new(sender, room.clone(), None));
        let to = if room.is_direct() {
            Identifier::Occupant(RoomOccupant::new(self.ctx.bot.person()?, room, None))
        } else {
            Identifier::Room(room)
        };

        let text = strip_mention(
            record.text.as_deref().unwrap_or_default(),
            self.ctx.bot.display_name(),
        );
        Ok(Message {
            body: text,
            frm: Some(frm),
            to: Some(to),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BotIdentity;
    use crate::memory::{ApiOp, MemoryApi};
    use serde_json::json;
    use spark_contracts::{PERSON_PREFIX, ROOM_PREFIX};
    use std::sync::Arc;

    fn bot_id() -> String {
        format!("{PERSON_PREFIX}bot")
    }

    fn alice_id() -> String {
        format!("{PERSON_PREFIX}alice")
    }

    fn setup() -> (Arc<MemoryApi>, Translator) {
        let api = Arc::new(MemoryApi::new());
        let ctx = SparkContext::new(
            api.clone(),
            BotIdentity::new(&bot_id(), "errbot@example.com").unwrap(),
        );
        let cache = RoomCache::new(api.clone());
        (api, Translator::new(ctx, cache))
    }

    fn seed_room(api: &MemoryApi, suffix: &str, room_type: &str) -> String {
        let id = format!("{ROOM_PREFIX}{suffix}");
        api.seed(
            ApiResource::Rooms,
            json!({"id": id, "title": suffix, "type": room_type, "isLocked": false}),
        );
        id
    }

    #[tokio::test]
    async fn direct_message_to_person_uses_exactly_one_address() {
        let (api, translator) = setup();
        let mut msg = Message::new("hello\nthere");
        msg.to = Some(Identifier::Person(
            Person::new(Some(&alice_id()), Some("alice@example.com")).unwrap(),
        ));
        let payload = translator.outbound(&msg).unwrap();
        assert_eq!(payload.address_count(), 1);
        assert_eq!(payload.to_person_id.as_deref(), Some(alice_id().as_str()));
        assert_eq!(payload.markdown, "hello  \nthere");

        translator.send(&msg).await.unwrap();
        assert_eq!(api.calls(ApiOp::Create, ApiResource::Messages), 1);
        let sent = &api.records(ApiResource::Messages)[0];
        assert!(sent.get("toPersonEmail").is_none());
        assert!(sent.get("roomId").is_none());
    }

    #[tokio::test]
    async fn direct_message_by_email_only() {
        let (_api, translator) = setup();
        let mut msg = Message::new("hi");
        msg.to = Some(Identifier::Person(
            Person::with_email("alice@example.com").unwrap(),
        ));
        let payload = translator.outbound(&msg).unwrap();
        assert_eq!(payload.to_person_email.as_deref(), Some("alice@example.com"));
        assert_eq!(payload.address_count(), 1);
    }

    #[tokio::test]
    async fn group_message_goes_to_room() {
        let (api, translator) = setup();
        let room_id = seed_room(&api, "g", "group");
        let room = translator
            .cache
            .get(&ResourceId::room(&room_id).unwrap())
            .await
            .unwrap();
        let mut msg = Message::new("status");
        msg.to = Some(Identifier::Room(room));
        let payload = translator.outbound(&msg).unwrap();
        assert_eq!(payload.room_id.as_deref(), Some(room_id.as_str()));
        assert_eq!(payload.address_count(), 1);
    }

    #[test]
    fn message_without_destination_is_rejected() {
        let (_api, translator) = setup();
        assert!(matches!(
            translator.outbound(&Message::new("lost")),
            Err(SparkError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn inbound_group_message_strips_mention_and_targets_room() {
        let (api, translator) = setup();
        let room_id = seed_room(&api, "g", "group");
        api.seed(
            ApiResource::Messages,
            json!({
                "id": "m1",
                "roomId": room_id,
                "roomType": "group",
                "personId": alice_id(),
                "personEmail": "alice@example.com",
                "text": "errbot status please"
            }),
        );
        let msg = translator.decode_inbound("m1").await.unwrap();
        assert_eq!(msg.body, "status please");
        assert!(msg.is_group());
        match msg.frm.as_ref().unwrap() {
            Identifier::Occupant(occupant) => {
                assert_eq!(occupant.person().id().unwrap().as_str(), alice_id());
                assert_eq!(occupant.room().id().as_str(), room_id);
            }
            other => panic!("unexpected sender {other:?}"),
        }
    }

    #[tokio::test]
    async fn inbound_direct_message_targets_bot_in_room() {
        let (api, translator) = setup();
        let room_id = seed_room(&api, "d", "direct");
        api.seed(
            ApiResource::Messages,
            json!({"id": "m2", "roomId": room_id, "personId": alice_id(), "text": "ping"}),
        );
        let msg = translator.decode_inbound("m2").await.unwrap();
        assert!(msg.is_direct());
        match msg.to.as_ref().unwrap() {
            Identifier::Occupant(occupant) => {
                assert_eq!(occupant.person().id().unwrap().as_str(), bot_id());
                assert_eq!(occupant.room().id().as_str(), room_id);
            }
            other => panic!("unexpected destination {other:?}"),
        }
    }
}
