//! Conversation state
//!
//! An immutable, ordered list of messages. Every change builds a new
//! `Conversation`; clones share storage, so publishing one per streamed
//! chunk stays cheap.

use std::sync::Arc;

use crate::types::{Message, Role};

/// Chronological message list, always starting with the system prompt
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Arc<[Message]>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: Arc::from(vec![Message::system(system_prompt)]),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages shown to the user, i.e. everything after the system prompt
    pub fn visible(&self) -> &[Message] {
        &self.messages[1..]
    }

    pub fn system(&self) -> &Message {
        &self.messages[0]
    }

    pub fn trailing(&self) -> &Message {
        // Never empty: the system message is always present
        &self.messages[self.messages.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the last turn is the user's and still has no answer.
    pub fn awaiting_response(&self) -> bool {
        self.trailing().role == Role::User
    }

    pub fn with_user(&self, content: impl Into<String>) -> Self {
        self.with_message(Message::user(content))
    }

    pub fn with_assistant(&self, content: impl Into<String>) -> Self {
        self.with_message(Message::assistant(content))
    }

    /// Copy with `delta` appended to the trailing assistant message.
    ///
    /// Returns `None` when the trailing message is not an assistant turn.
    pub fn with_trailing_appended(&self, delta: &str) -> Option<Self> {
        let (last, rest) = self.messages.split_last()?;
        if last.role != Role::Assistant {
            return None;
        }

        let mut messages = Vec::with_capacity(self.messages.len());
        messages.extend_from_slice(rest);
        messages.push(last.with_appended(delta));
        Some(Self {
            messages: messages.into(),
        })
    }

    fn with_message(&self, message: Message) -> Self {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend_from_slice(&self.messages);
        messages.push(message);
        Self {
            messages: messages.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_seeded_with_system_prompt() {
        let conversation = Conversation::new("Be helpful.");
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.system().role, Role::System);
        assert_eq!(conversation.system().content, "Be helpful.");
        assert!(conversation.visible().is_empty());
        assert!(!conversation.awaiting_response());
    }

    #[test]
    fn test_updates_do_not_touch_previous_value() {
        let before = Conversation::new("sys");
        let after = before.with_user("hello");

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert!(after.awaiting_response());
        assert_eq!(after.visible()[0].content, "hello");
    }

    #[test]
    fn test_trailing_append_replaces_only_last() {
        let conversation = Conversation::new("sys").with_user("hi").with_assistant("");
        let step1 = conversation.with_trailing_appended("Hel").unwrap();
        let step2 = step1.with_trailing_appended("lo").unwrap();

        assert_eq!(conversation.trailing().content, "");
        assert_eq!(step1.trailing().content, "Hel");
        assert_eq!(step2.trailing().content, "Hello");
        assert_eq!(step2.messages()[..2], conversation.messages()[..2]);
        assert_eq!(step2.trailing().id, conversation.trailing().id);
    }

    #[test]
    fn test_trailing_append_requires_assistant() {
        let conversation = Conversation::new("sys");
        assert!(conversation.with_trailing_appended("x").is_none());

        let conversation = conversation.with_user("hi");
        assert!(conversation.with_trailing_appended("x").is_none());
    }

    #[test]
    fn test_system_message_stays_first() {
        let conversation = Conversation::new("sys")
            .with_user("a")
            .with_assistant("b")
            .with_user("c");
        assert_eq!(conversation.system().content, "sys");
        assert_eq!(conversation.messages()[0].role, Role::System);
        assert_eq!(conversation.visible().len(), 3);
    }
}
