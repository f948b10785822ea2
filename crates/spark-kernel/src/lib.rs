use chrono::{DateTime, Utc};
use spark_contracts::{
    Event, EventResource, EventVerb, OutboundMessage, ResourceId, RoomRecord, SparkError,
};

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|v| v.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomType {
    Direct,
    Group,
}

impl RoomType {
    pub fn from_wire(text: &str) -> Result<Self, SparkError> {
        match text {
            "direct" => Ok(RoomType::Direct),
            "group" => Ok(RoomType::Group),
            other => Err(SparkError::Validation(format!("unknown room type: {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomType::Direct => "direct",
            RoomType::Group => "group",
        }
    }
}

/// Hydrated room entity as held by the room cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    id: ResourceId,
    title: String,
    room_type: RoomType,
    is_locked: bool,
    last_activity: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
    team_id: Option<String>,
}

impl Room {
    pub fn from_record(record: &RoomRecord) -> Result<Self, SparkError> {
        Ok(Self {
            id: ResourceId::room(&record.id)?,
            title: record.title.clone(),
            room_type: RoomType::from_wire(&record.room_type)?,
            is_locked: record.is_locked,
            last_activity: record.last_activity.as_deref().and_then(parse_rfc3339),
            created: record.created.as_deref().and_then(parse_rfc3339),
            team_id: record.team_id.clone(),
        })
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn room_type(&self) -> RoomType {
        self.room_type
    }

    pub fn is_direct(&self) -> bool {
        self.room_type == RoomType::Direct
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    /// Direct rooms have no settable title.
    pub fn check_title_change(&self) -> Result<(), SparkError> {
        if self.is_direct() {
            return Err(SparkError::Validation(format!(
                "room {} is direct; its title cannot be changed",
                self.id
            )));
        }
        Ok(())
    }

    pub fn set_title(&mut self, title: &str) -> Result<(), SparkError> {
        self.check_title_change()?;
        self.title = title.to_string();
        Ok(())
    }
}

/// What the dispatcher must do with one webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    DeliverMessage { message_id: String },
    SuppressEcho,
    Hydrate { room_id: ResourceId },
    Put(Room),
    Invalidate { room_id: ResourceId },
    Ignore { reason: &'static str },
}

pub fn plan_event(event: &Event, self_id: &ResourceId) -> Result<CacheAction, SparkError> {
    match (event.resource, event.verb) {
        (EventResource::Message, EventVerb::Created) => {
            if event.data_str("personId") == Some(self_id.as_str()) {
                return Ok(CacheAction::SuppressEcho);
            }
            let message_id = required(event, "id")?;
            Ok(CacheAction::DeliverMessage {
                message_id: message_id.to_string(),
            })
        }
        (EventResource::Message, _) => Ok(CacheAction::Ignore {
            reason: "message_not_created",
        }),
        (EventResource::Membership, verb @ (EventVerb::Created | EventVerb::Deleted)) => {
            if event.data_str("personId") != Some(self_id.as_str()) {
                return Ok(CacheAction::Ignore {
                    reason: "foreign_membership",
                });
            }
            let room_id = ResourceId::room(required(event, "roomId")?)?;
            Ok(if verb == EventVerb::Created {
                CacheAction::Hydrate { room_id }
            } else {
                CacheAction::Invalidate { room_id }
            })
        }
        (EventResource::Membership, _) => Ok(CacheAction::Ignore {
            reason: "membership_updated",
        }),
        (EventResource::Room, EventVerb::Created) => {
            let room_id = ResourceId::room(room_id_of(event)?)?;
            // Partial payloads fall back to a fetch.
            match serde_json::from_value::<RoomRecord>(event.data.clone())
                .ok()
                .and_then(|record| Room::from_record(&record).ok())
            {
                Some(room) if room.id() == &room_id => Ok(CacheAction::Put(room)),
                _ => Ok(CacheAction::Hydrate { room_id }),
            }
        }
        (EventResource::Room, EventVerb::Updated | EventVerb::Deleted) => {
            let room_id = ResourceId::room(room_id_of(event)?)?;
            Ok(CacheAction::Invalidate { room_id })
        }
        (EventResource::Room, EventVerb::Unknown) => Ok(CacheAction::Ignore {
            reason: "unknown_room_event",
        }),
        (EventResource::Team | EventResource::Unknown, _) => Ok(CacheAction::Ignore {
            reason: "unhandled_resource",
        }),
    }
}

fn required<'a>(event: &'a Event, field: &str) -> Result<&'a str, SparkError> {
    event
        .data_str(field)
        .ok_or_else(|| SparkError::Validation(format!("event data is missing {field}")))
}

/// Room events carry the room as `id`; some deliveries use `roomId`.
fn room_id_of(event: &Event) -> Result<&str, SparkError> {
    event
        .data_str("roomId")
        .or_else(|| event.data_str("id"))
        .ok_or_else(|| SparkError::Validation("room event data has no room id".to_string()))
}

/// Rewrites lone newlines as Markdown hard breaks (`"  \n"`), including one at
/// the very start. Paragraph breaks and lines that already end in two spaces
/// are left alone.
pub fn hard_line_breaks(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    for (i, c) in chars.iter().enumerate() {
        if *c == '\n' {
            let prev_newline = i > 0 && chars[i - 1] == '\n';
            let next_newline = chars.get(i + 1) == Some(&'\n');
            if !prev_newline && !next_newline && !out.ends_with("  ") {
                out.push_str("  ");
            }
        }
        out.push(*c);
    }
    out
}

/// Drops a leading `"<display name> "` once; group messages arrive with the mention inline.
pub fn strip_mention(text: &str, display_name: &str) -> String {
    if display_name.is_empty() {
        return text.to_string();
    }
    match text.strip_prefix(display_name).and_then(|rest| rest.strip_prefix(' ')) {
        Some(rest) => rest.to_string(),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Room(ResourceId),
    PersonId(ResourceId),
    PersonEmail(String),
}

/// What is known locally about where a message goes.
#[derive(Debug, Clone, Default)]
pub struct AddressHints<'a> {
    pub direct: bool,
    pub room_id: Option<&'a ResourceId>,
    pub person_id: Option<&'a ResourceId>,
    pub person_email: Option<&'a str>,
}

/// Direct messages go to the person (id before email); group messages go to the room.
pub fn resolve_destination(hints: &AddressHints<'_>) -> Result<Destination, SparkError> {
    if hints.direct {
        if let Some(id) = hints.person_id {
            return Ok(Destination::PersonId(id.clone()));
        }
        if let Some(email) = hints.person_email {
            return Ok(Destination::PersonEmail(email.to_string()));
        }
        return Err(SparkError::Validation(
            "direct message has no person id or email".to_string(),
        ));
    }
    hints
        .room_id
        .map(|id| Destination::Room(id.clone()))
        .ok_or_else(|| SparkError::Validation("group message has no room id".to_string()))
}

pub fn outbound_message(body: &str, destination: &Destination) -> OutboundMessage {
    let mut msg = OutboundMessage {
        markdown: hard_line_breaks(body),
        room_id: None,
        to_person_id: None,
        to_person_email: None,
    };
    match destination {
        Destination::Room(id) => msg.room_id = Some(id.to_string()),
        Destination::PersonId(id) => msg.to_person_id = Some(id.to_string()),
        Destination::PersonEmail(email) => msg.to_person_email = Some(email.clone()),
    }
    msg
}
