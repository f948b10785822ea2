use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SparkError;

/// Base64 of `ciscospark://us/PEOPLE`, truncated where the encoding stops being stable.
pub const PERSON_PREFIX: &str = "Y2lzY29zcGFyazovL3VzL1BFT1BMRS";
/// Base64 of `ciscospark://us/ROOM`.
pub const ROOM_PREFIX: &str = "Y2lzY29zcGFyazovL3VzL1JPT00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Person,
    Room,
    Email,
    Invalid,
}

/// The one place identifier text is classified. Pure prefix/substring test.
pub fn classify(text: &str) -> IdentifierKind {
    if text.starts_with(ROOM_PREFIX) {
        IdentifierKind::Room
    } else if text.starts_with(PERSON_PREFIX) {
        IdentifierKind::Person
    } else if text.contains('@') {
        IdentifierKind::Email
    } else {
        IdentifierKind::Invalid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Person,
    Room,
}

/// Prefix-tagged remote identifier. The kind is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    kind: ResourceKind,
    value: String,
}

impl ResourceId {
    pub fn parse(text: &str) -> Result<Self, SparkError> {
        let kind = match classify(text) {
            IdentifierKind::Person => ResourceKind::Person,
            IdentifierKind::Room => ResourceKind::Room,
            IdentifierKind::Email | IdentifierKind::Invalid => {
                return Err(SparkError::Validation(format!(
                    "not a person or room id: {text}"
                )))
            }
        };
        Ok(Self {
            kind,
            value: text.to_string(),
        })
    }

    pub fn person(text: &str) -> Result<Self, SparkError> {
        Self::expect(text, ResourceKind::Person)
    }

    pub fn room(text: &str) -> Result<Self, SparkError> {
        Self::expect(text, ResourceKind::Room)
    }

    fn expect(text: &str, kind: ResourceKind) -> Result<Self, SparkError> {
        let id = Self::parse(text)?;
        if id.kind != kind {
            return Err(SparkError::Validation(format!(
                "expected a {kind:?} id, got {:?} id {text}",
                id.kind
            )));
        }
        Ok(id)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = SparkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.value
    }
}

impl PartialEq<str> for ResourceId {
    fn eq(&self, other: &str) -> bool {
        self.value == other
    }
}

impl PartialEq<&str> for ResourceId {
    fn eq(&self, other: &&str) -> bool {
        self.value == *other
    }
}

/// Validates an email address the same way every path does: contains `@`
/// and does not collide with an id prefix.
pub fn validate_email(text: &str) -> Result<(), SparkError> {
    match classify(text) {
        IdentifierKind::Email => Ok(()),
        _ => Err(SparkError::Validation(format!(
            "not an email address: {text}"
        ))),
    }
}
