use std::fmt;

/// Permission tier of a chat user, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UserPerm {
    Member,
    Administrator,
    Owner,
    BotOwner,
}

impl UserPerm {
    pub fn as_str(&self) -> &str {
        match self {
            UserPerm::Member => "member",
            UserPerm::Administrator => "administrator",
            UserPerm::Owner => "owner",
            UserPerm::BotOwner => "bot owner",
        }
    }

    /// Whether this tier satisfies `required`
    pub fn allows(&self, required: UserPerm) -> bool {
        *self >= required
    }
}

/// Represents a user in the system
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub permission: UserPerm,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            permission: UserPerm::Member,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_permission(mut self, permission: UserPerm) -> Self {
        self.permission = permission;
        self
    }

    pub fn display_name(&self) -> String {
        self.username.clone().unwrap_or_else(|| self.id.clone())
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
