use std::fmt;
use std::sync::Arc;

use spark_contracts::{
    validate_email, ApiResource, MembershipRecord, PersonRecord, ResourceId, SparkError,
    SparkResult,
};
use spark_kernel::Room;
use tokio::sync::OnceCell;

use crate::api::{decode, SparkApi};

/// A user of the remote service. Needs an id or an email; the rest is
/// hydrated on first read with at most one fetch per instance.
#[derive(Debug, Clone)]
pub struct Person {
    id: Option<ResourceId>,
    email: Option<String>,
    display_name: Option<String>,
    is_moderator: bool,
    is_monitor: bool,
    details: OnceCell<PersonRecord>,
}

impl Person {
    pub fn new(id: Option<&str>, email: Option<&str>) -> SparkResult<Self> {
        if id.is_none() && email.is_none() {
            return Err(SparkError::Validation(
                "a person needs either an id or an email address".to_string(),
            ));
        }
        let id = id.map(ResourceId::person).transpose()?;
        if let Some(email) = email {
            validate_email(email)?;
        }
        Ok(Self {
            id,
            email: email.map(str::to_string),
            display_name: None,
            is_moderator: false,
            is_monitor: false,
            details: OnceCell::new(),
        })
    }

    pub fn with_id(id: &str) -> SparkResult<Self> {
        Self::new(Some(id), None)
    }

    pub fn with_email(email: &str) -> SparkResult<Self> {
        Self::new(None, Some(email))
    }

    pub fn from_membership(record: &MembershipRecord) -> SparkResult<Self> {
        let mut person = Self::new(Some(&record.person_id), record.person_email.as_deref())?;
        person.display_name = record.person_display_name.clone();
        person.is_moderator = record.is_moderator;
        person.is_monitor = record.is_monitor;
        Ok(person)
    }

    pub fn from_record(record: PersonRecord) -> SparkResult<Self> {
        let mut person = Self::new(Some(&record.id), record.emails.last().map(String::as_str))?;
        person.display_name = record.display_name.clone();
        person.details = OnceCell::from(record);
        Ok(person)
    }

    pub fn id(&self) -> Option<&ResourceId> {
        self.id.as_ref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn is_moderator(&self) -> bool {
        self.is_moderator
    }

    pub fn is_monitor(&self) -> bool {
        self.is_monitor
    }

    pub fn set_id(&mut self, id: &str) -> SparkResult<()> {
        self.id = Some(ResourceId::person(id)?);
        Ok(())
    }

    pub fn set_email(&mut self, email: &str) -> SparkResult<()> {
        validate_email(email)?;
        self.email = Some(email.to_string());
        Ok(())
    }

    pub fn set_display_name(&mut self, display_name: &str) {
        self.display_name = Some(display_name.to_string());
    }

    /// Fetches the person record once; later calls reuse it.
    pub async fn hydrate(&self, api: &dyn SparkApi) -> SparkResult<&PersonRecord> {
        self.details
            .get_or_try_init(|| async {
                match (&self.id, &self.email) {
                    (Some(id), _) => decode(api.get(ApiResource::People, id.as_str()).await?),
                    (None, Some(email)) => {
                        let found = api.list(ApiResource::People, &[("email", email.as_str())]).await?;
                        match found.into_iter().next() {
                            Some(raw) => decode(raw),
                            None => Err(SparkError::NotFound(format!("person {email}"))),
                        }
                    }
                    (None, None) => Err(SparkError::Validation(
                        "a person needs either an id or an email address".to_string(),
                    )),
                }
            })
            .await
    }

    pub async fn resolved_id(&self, api: &dyn SparkApi) -> SparkResult<ResourceId> {
        if let Some(id) = &self.id {
            return Ok(id.clone());
        }
        ResourceId::person(&self.hydrate(api).await?.id)
    }

    pub async fn resolved_email(&self, api: &dyn SparkApi) -> SparkResult<String> {
        if let Some(email) = &self.email {
            return Ok(email.clone());
        }
        self.hydrate(api)
            .await?
            .emails
            .last()
            .cloned()
            .ok_or_else(|| SparkError::NotFound("person has no email address".to_string()))
    }

    pub async fn resolved_display_name(&self, api: &dyn SparkApi) -> SparkResult<String> {
        if let Some(name) = &self.display_name {
            return Ok(name.clone());
        }
        Ok(self
            .hydrate(api)
            .await?
            .display_name
            .clone()
            .unwrap_or_default())
    }
}

impl PartialEq for Person {
    fn eq(&self, other: &Self) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.email.is_some() && self.email == other.email,
        }
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.email) {
            (Some(id), _) => write!(f, "{id}"),
            (None, Some(email)) => f.write_str(email),
            (None, None) => Ok(()),
        }
    }
}

/// A person seen through one room. Built fresh per query, never cached.
#[derive(Debug, Clone)]
pub struct RoomOccupant {
    person: Person,
    room: Arc<Room>,
    membership_id: Option<String>,
}

impl RoomOccupant {
    pub fn new(person: Person, room: Arc<Room>, membership_id: Option<String>) -> Self {
        Self {
            person,
            room,
            membership_id,
        }
    }

    pub fn from_membership(record: &MembershipRecord, room: Arc<Room>) -> SparkResult<Self> {
        Ok(Self::new(
            Person::from_membership(record)?,
            room,
            Some(record.id.clone()),
        ))
    }

    pub fn person(&self) -> &Person {
        &self.person
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn membership_id(&self) -> Option<&str> {
        self.membership_id.as_deref()
    }
}

impl PartialEq for RoomOccupant {
    fn eq(&self, other: &Self) -> bool {
        self.person == other.person && self.room.id() == other.room.id()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    Person(Person),
    Room(Arc<Room>),
    Occupant(RoomOccupant),
}

impl Identifier {
    pub fn room(&self) -> Option<&Arc<Room>> {
        match self {
            Identifier::Room(room) => Some(room),
            Identifier::Occupant(occupant) => Some(occupant.room()),
            Identifier::Person(_) => None,
        }
    }

    pub fn person(&self) -> Option<&Person> {
        match self {
            Identifier::Person(person) => Some(person),
            Identifier::Occupant(occupant) => Some(occupant.person()),
            Identifier::Room(_) => None,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Person(person) => write!(f, "{person}"),
            Identifier::Room(room) => write!(f, "{}", room.id()),
            Identifier::Occupant(occupant) => write!(f, "{}", occupant.person()),
        }
    }
}

/// Framework-side message. Direct when addressed to a person, group when addressed to a room.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub body: String,
    pub frm: Option<Identifier>,
    pub to: Option<Identifier>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            frm: None,
            to: None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(
            self.to,
            Some(Identifier::Person(_)) | Some(Identifier::Occupant(_))
        )
    }

    pub fn is_group(&self) -> bool {
        matches!(self.to, Some(Identifier::Room(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ApiOp, MemoryApi};
    use serde_json::json;
    use spark_contracts::PERSON_PREFIX;

    fn alice_id() -> String {
        format!("{PERSON_PREFIX}alice")
    }

    #[test]
    fn person_requires_id_or_email() {
        assert!(matches!(
            Person::new(None, None),
            Err(SparkError::Validation(_))
        ));
        assert!(Person::with_id("not-an-id").is_err());
        assert!(Person::with_email("nobody").is_err());
    }

    #[test]
    fn setters_revalidate() {
        let mut person = Person::with_email("alice@example.com").unwrap();
        assert!(person.set_id("bogus").is_err());
        assert!(person.id().is_none());
        assert!(person.set_email("still-bogus").is_err());
        assert_eq!(person.email(), Some("alice@example.com"));
        person.set_id(&alice_id()).unwrap();
        assert_eq!(person.id().unwrap().as_str(), alice_id());
    }

    #[tokio::test]
    async fn hydration_fetches_once() {
        let api = MemoryApi::new();
        api.seed(
            ApiResource::People,
            json!({"id": alice_id(), "emails": ["alice@example.com"], "displayName": "Alice"}),
        );
        let person = Person::with_id(&alice_id()).unwrap();
        assert_eq!(person.resolved_email(&api).await.unwrap(), "alice@example.com");
        assert_eq!(person.resolved_display_name(&api).await.unwrap(), "Alice");
        assert_eq!(api.calls(ApiOp::Get, ApiResource::People), 1);
    }

    #[tokio::test]
    async fn hydration_by_email_uses_people_lookup() {
        let api = MemoryApi::new();
        api.seed(
            ApiResource::People,
            json!({"id": alice_id(), "emails": ["alice@example.com"]}),
        );
        let person = Person::with_email("alice@example.com").unwrap();
        assert_eq!(person.resolved_id(&api).await.unwrap().as_str(), alice_id());
        assert_eq!(api.calls(ApiOp::List, ApiResource::People), 1);

        let stranger = Person::with_email("who@example.com").unwrap();
        assert!(stranger.resolved_id(&api).await.unwrap_err().is_not_found());
    }

    #[test]
    fn people_compare_by_id_then_email() {
        let a = Person::new(Some(&alice_id()), Some("alice@example.com")).unwrap();
        let b = Person::with_id(&alice_id()).unwrap();
        let c = Person::with_email("alice@example.com").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.to_string(), alice_id());
    }
}
