//! Message parser - Parses raw chat text into structured messages and module
//! commands

use once_cell::sync::Lazy;
use regex_lite::Regex;
use crate::domain::entities::{Category, Content, Message, ModuleVerb, User};

/// Quoted groups or runs of anything that is neither whitespace nor a quote
static TOKEN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r#""[^"]*"|'[^']*'|[^\s"']+"#).ok());

/// Split on whitespace, keeping single- or double-quoted groups together
pub fn tokenize(text: &str) -> Vec<String> {
    let Some(re) = TOKEN.as_ref() else {
        return text.split_whitespace().map(str::to_string).collect();
    };
    re.find_iter(text)
        .map(|m| {
            let token = m.as_str();
            let quoted = token.len() >= 2
                && ((token.starts_with('"') && token.ends_with('"'))
                    || (token.starts_with('\'') && token.ends_with('\'')));
            if quoted {
                token[1..token.len() - 1].to_string()
            } else {
                token.to_string()
            }
        })
        .collect()
}

/// Parses incoming messages into structured Message objects
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a text message. Only text starting with the command prefix
    /// (followed by whitespace or nothing) becomes a command.
    pub fn parse(&self, chat_id: impl Into<String>, text: impl Into<String>, sender: Option<User>) -> Message {
        let text = text.into();
        let chat_id = chat_id.into();

        let content = match text.strip_prefix(&self.command_prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                let mut tokens = tokenize(rest).into_iter();
                let name = tokens.next().unwrap_or_default();
                Content::Command { name, args: tokens.collect() }
            }
            _ if text.trim().is_empty() => Content::Empty,
            _ => Content::Text(text),
        };

        let message = Message::new(chat_id, content);
        match sender {
            Some(user) => message.with_sender(user),
            None => message,
        }
    }
}

/// A module manager command with its flags pulled out of the arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCommand {
    pub verb: ModuleVerb,
    pub args: Vec<String>,
    pub upgrade: bool,
    pub force: bool,
    pub category: Option<Category>,
    pub author: Option<String>,
}

impl ModuleCommand {
    pub fn new(verb: ModuleVerb) -> Self {
        Self {
            verb,
            args: Vec::new(),
            upgrade: false,
            force: false,
            category: None,
            author: None,
        }
    }

    /// Build from the verb and raw arguments of a command message
    pub fn from_parts(verb: ModuleVerb, raw: &[String]) -> Result<Self, String> {
        let mut command = Self::new(verb);
        let mut iter = raw.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-u" | "--upgrade" => command.upgrade = true,
                "-f" | "--force" => command.force = true,
                "-c" | "--category" => {
                    let value = iter.next().ok_or("Missing value for --category")?;
                    let category = Category::parse(value)
                        .ok_or_else(|| format!("Unknown category {}", value))?;
                    command.category = Some(category);
                }
                "-a" | "--author" => {
                    let value = iter.next().ok_or("Missing value for --author")?;
                    command.author = Some(value.clone());
                }
                _ => command.args.push(arg.clone()),
            }
        }
        Ok(command)
    }
}
