mod error;
mod id;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{SparkError, SparkResult};
pub use id::{
    classify, validate_email, IdentifierKind, ResourceId, ResourceKind, PERSON_PREFIX,
    ROOM_PREFIX,
};

pub const DEFAULT_API_BASE: &str = "https://api.ciscospark.com/v1";

/// Remote collections addressed as `<base>/<resource>[/<id>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiResource {
    Rooms,
    Memberships,
    People,
    Messages,
    Webhooks,
}

impl ApiResource {
    pub fn path(self) -> &'static str {
        match self {
            ApiResource::Rooms => "rooms",
            ApiResource::Memberships => "memberships",
            ApiResource::People => "people",
            ApiResource::Messages => "messages",
            ApiResource::Webhooks => "webhooks",
        }
    }
}

/// One page of a list endpoint. Further pages are announced by the `Link` header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub room_type: String,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub last_activity: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub id: String,
    pub room_id: String,
    pub person_id: String,
    #[serde(default)]
    pub person_email: Option<String>,
    #[serde(default)]
    pub person_display_name: Option<String>,
    #[serde(default)]
    pub is_moderator: bool,
    #[serde(default)]
    pub is_monitor: bool,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersonRecord {
    pub id: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub room_id: String,
    #[serde(default)]
    pub room_type: Option<String>,
    pub person_id: String,
    #[serde(default)]
    pub person_email: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRecord {
    pub id: String,
    pub name: String,
    pub target_url: String,
    pub resource: String,
    pub event: String,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebhook {
    pub name: String,
    pub target_url: String,
    pub resource: String,
    pub event: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMembership {
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRoom {
    pub title: String,
}

/// Body of `POST messages`. Exactly one addressing field is ever set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_person_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_person_email: Option<String>,
}

impl OutboundMessage {
    pub fn address_count(&self) -> usize {
        [&self.room_id, &self.to_person_id, &self.to_person_email]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }
}

/// Webhook delivery as posted by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub resource: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResource {
    Message,
    Membership,
    Room,
    Team,
    Unknown,
}

impl EventResource {
    pub fn from_wire(text: &str) -> Self {
        match text {
            "messages" | "message" => EventResource::Message,
            "memberships" | "membership" => EventResource::Membership,
            "rooms" | "room" => EventResource::Room,
            "teams" | "team" => EventResource::Team,
            _ => EventResource::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventVerb {
    Created,
    Updated,
    Deleted,
    Unknown,
}

impl EventVerb {
    pub fn from_wire(text: &str) -> Self {
        match text {
            "created" => EventVerb::Created,
            "updated" => EventVerb::Updated,
            "deleted" => EventVerb::Deleted,
            _ => EventVerb::Unknown,
        }
    }
}

/// Normalized input of the event dispatcher.
#[derive(Debug, Clone)]
pub struct Event {
    pub resource: EventResource,
    pub verb: EventVerb,
    pub data: Value,
    pub actor_id: Option<String>,
}

impl Event {
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(|v| v.as_str())
    }
}

impl From<WebhookEnvelope> for Event {
    fn from(envelope: WebhookEnvelope) -> Self {
        Event {
            resource: EventResource::from_wire(&envelope.resource),
            verb: EventVerb::from_wire(&envelope.event),
            data: envelope.data,
            actor_id: envelope.actor_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope_schema() -> jsonschema::Validator {
        let schema_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("contracts/v1/webhook-envelope.schema.json");
        let text = std::fs::read_to_string(schema_path).expect("read envelope schema");
        let schema: Value = serde_json::from_str(&text).expect("parse envelope schema");
        jsonschema::validator_for(&schema).expect("compile envelope schema")
    }

    fn sample_envelope() -> Value {
        json!({
            "id": "Y2lzY29zcGFyazovL3VzL1dFQkhPT0svMQ",
            "name": "Spark Errbot Webhook",
            "targetUrl": "https://bot.example.com/incoming",
            "resource": "memberships",
            "event": "created",
            "actorId": "Y2lzY29zcGFyazovL3VzL1BFT1BMRS9hY3Rvcg",
            "data": {
                "id": "Y2lzY29zcGFyazovL3VzL01FTUJFUlNISVAvMQ",
                "roomId": "Y2lzY29zcGFyazovL3VzL1JPT00vMQ",
                "personId": "Y2lzY29zcGFyazovL3VzL1BFT1BMRS9ib3Q",
                "personEmail": "bot@example.com",
                "isModerator": false,
                "isMonitor": false,
                "created": "2026-02-14T00:00:00.000Z"
            }
        })
    }

    #[test]
    fn sample_envelope_matches_schema_and_normalizes() {
        let validator = envelope_schema();
        let raw = sample_envelope();
        assert!(validator.validate(&raw).is_ok());

        let envelope: WebhookEnvelope = serde_json::from_value(raw).unwrap();
        let event = Event::from(envelope);
        assert_eq!(event.resource, EventResource::Membership);
        assert_eq!(event.verb, EventVerb::Created);
        assert_eq!(
            event.data_str("roomId"),
            Some("Y2lzY29zcGFyazovL3VzL1JPT00vMQ")
        );
    }

    #[test]
    fn schema_rejects_envelope_without_resource() {
        let validator = envelope_schema();
        let mut raw = sample_envelope();
        raw.as_object_mut().unwrap().remove("resource");
        assert!(validator.validate(&raw).is_err());
    }

    #[test]
    fn unknown_resources_and_verbs_normalize_to_unknown() {
        assert_eq!(EventResource::from_wire("attachmentActions"), EventResource::Unknown);
        assert_eq!(EventResource::from_wire("teams"), EventResource::Team);
        assert_eq!(EventVerb::from_wire("migrated"), EventVerb::Unknown);
    }

    #[test]
    fn outbound_message_omits_unset_addresses() {
        let msg = OutboundMessage {
            markdown: "hi".to_string(),
            room_id: None,
            to_person_id: None,
            to_person_email: Some("a@b.c".to_string()),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"markdown": "hi", "toPersonEmail": "a@b.c"}));
        assert_eq!(msg.address_count(), 1);
    }

    #[test]
    fn room_record_tolerates_missing_team() {
        let record: RoomRecord = serde_json::from_value(json!({
            "id": "Y2lzY29zcGFyazovL3VzL1JPT00vMQ",
            "title": "ops",
            "type": "group",
            "isLocked": true,
            "lastActivity": "2026-02-14T00:00:00.000Z",
            "created": "2026-02-13T00:00:00.000Z"
        }))
        .unwrap();
        assert!(record.is_locked);
        assert_eq!(record.team_id, None);
    }
}
