//! Response cache
//!
//! Maps prompt text to the full response previously generated for it.
//! Entries live for the lifetime of the process and are never evicted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How prompt text is turned into a cache key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Byte-for-byte prompt text
    #[default]
    Exact,
    /// Leading and trailing whitespace ignored
    Trimmed,
    /// Whitespace trimmed and compared case-insensitively
    TrimmedCaseInsensitive,
}

impl KeyPolicy {
    fn key(&self, prompt: &str) -> String {
        match self {
            KeyPolicy::Exact => prompt.to_string(),
            KeyPolicy::Trimmed => prompt.trim().to_string(),
            KeyPolicy::TrimmedCaseInsensitive => prompt.trim().to_lowercase(),
        }
    }
}

/// In-memory prompt → response map.
///
/// Not synchronized: the chat session owns it and is its only writer.
#[derive(Debug, Default)]
pub struct ResponseCache {
    policy: KeyPolicy,
    entries: HashMap<String, String>,
}

impl ResponseCache {
    pub fn new(policy: KeyPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    /// Looks up the response stored for `prompt`.
    pub fn get(&self, prompt: &str) -> Option<&str> {
        self.entries.get(&self.policy.key(prompt)).map(String::as_str)
    }

    /// Stores `response` for `prompt`, replacing any previous entry.
    pub fn put(&mut self, prompt: &str, response: impl Into<String>) {
        let key = self.policy.key(prompt);
        self.entries.insert(key, response.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
