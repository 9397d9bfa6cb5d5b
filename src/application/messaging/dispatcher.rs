//! Message dispatcher - Routes module commands to the module service

use std::sync::Arc;
use crate::application::errors::ModuleError;
use crate::application::services::{module_service, ModuleService};
use crate::domain::entities::{Content, Message, ModuleVerb, User, UserPerm};
use super::parser::{MessageParser, ModuleCommand};

/// Rejects a verb the sender's tier does not cover
pub fn authorize(sender: Option<&User>, verb: ModuleVerb) -> Result<(), ModuleError> {
    let tier = sender.map(|u| u.permission).unwrap_or(UserPerm::Member);
    let required = verb.required_permission();
    if tier.allows(required) {
        return Ok(());
    }
    Err(ModuleError::PermissionDenied(format!(
        "{} requires {} but {} is {}",
        verb.name(),
        required.as_str(),
        sender.map(User::display_name).unwrap_or_else(|| "anonymous".to_string()),
        tier.as_str()
    )))
}

/// Message dispatcher - parses chat text and runs module commands
pub struct MessageDispatcher {
    parser: MessageParser,
    service: Arc<ModuleService>,
}

impl MessageDispatcher {
    pub fn new(prefix: impl Into<String>, service: Arc<ModuleService>) -> Self {
        Self {
            parser: MessageParser::new(prefix),
            service,
        }
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    /// Process raw text; `None` when the text is not a module command
    pub async fn process_text(
        &self,
        chat_id: impl Into<String>,
        text: impl Into<String>,
        sender: Option<User>,
        group: Option<&str>,
    ) -> Option<String> {
        let mut message = self.parser.parse(chat_id, text, sender);
        if let Some(group) = group {
            message = message.with_group(group);
        }
        self.process(&message).await
    }

    /// Process a message. Permission is checked before anything else runs.
    pub async fn process(&self, message: &Message) -> Option<String> {
        let Content::Command { name, args } = &message.content else {
            return None;
        };

        let Some(verb) = ModuleVerb::parse(name) else {
            return Some(module_service::help());
        };

        if let Err(e) = authorize(message.sender.as_ref(), verb) {
            tracing::warn!("Rejected {} from chat {}: {}", verb.name(), message.chat_id, e);
            return Some(e.to_string());
        }

        let command = match ModuleCommand::from_parts(verb, args) {
            Ok(command) => command,
            Err(reason) => return Some(reason),
        };
        Some(self.service.execute(&command, message.group_id.as_deref()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_by_tier() {
        let admin = User::new("1").with_permission(UserPerm::Administrator);
        let owner = User::new("2").with_permission(UserPerm::BotOwner);

        assert!(authorize(Some(&admin), ModuleVerb::List).is_ok());
        assert!(authorize(Some(&admin), ModuleVerb::Disable).is_ok());
        assert!(matches!(
            authorize(Some(&admin), ModuleVerb::Install),
            Err(ModuleError::PermissionDenied(_))
        ));
        assert!(authorize(Some(&owner), ModuleVerb::Install).is_ok());
        assert!(authorize(None, ModuleVerb::List).is_err());
    }
}
