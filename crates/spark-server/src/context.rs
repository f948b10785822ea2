use std::sync::Arc;

use spark_config::Bot;
use spark_contracts::{validate_email, ResourceId, SparkResult};

use crate::api::SparkApi;
use crate::model::Person;

/// Who the bot is on the remote service.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    id: ResourceId,
    email: String,
    display_name: String,
}

impl BotIdentity {
    pub fn new(id: &str, email: &str) -> SparkResult<Self> {
        validate_email(email)?;
        Ok(Self {
            id: ResourceId::person(id)?,
            email: email.to_string(),
            display_name: email.split('@').next().unwrap_or_default().to_string(),
        })
    }

    pub fn from_config(bot: &Bot) -> SparkResult<Self> {
        Self::new(&bot.id, &bot.email)
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn person(&self) -> SparkResult<Person> {
        let mut person = Person::new(Some(self.id.as_str()), Some(&self.email))?;
        person.set_display_name(&self.display_name);
        Ok(person)
    }
}

/// Remote client plus self identity, built once at startup and handed to
/// every component that talks to the remote.
#[derive(Clone)]
pub struct SparkContext {
    pub api: Arc<dyn SparkApi>,
    pub bot: Arc<BotIdentity>,
}

impl SparkContext {
    pub fn new(api: Arc<dyn SparkApi>, bot: BotIdentity) -> Self {
        Self {
            api,
            bot: Arc::new(bot),
        }
    }
}
