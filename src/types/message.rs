//! Message types
//!
//! Defines chat message structures and roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// Message from the user
    User,
    /// Message from the AI assistant
    Assistant,
}

impl Role {
    /// Role name as understood by chat templates
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier, used as the render key
    pub id: Uuid,
    /// The role of the message sender
    pub role: Role,
    /// The content of the message
    pub content: String,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Copy of this message with `delta` appended to its content.
    ///
    /// Identity and timestamp are kept so the UI treats it as the same message.
    pub fn with_appended(&self, delta: &str) -> Self {
        let mut content = String::with_capacity(self.content.len() + delta.len());
        content.push_str(&self.content);
        content.push_str(delta);
        Self {
            content,
            ..self.clone()
        }
    }
}
