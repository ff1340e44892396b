//! Append-only conversation log, kept in memory for the lifetime of the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "Assistant",
        }
    }
}

/// Immutable once created; only readable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    id: Uuid,
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    fn new(role: Role, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Default)]
pub struct ConversationHistory {
    entries: Vec<ConversationEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, role: Role, content: &str) -> &ConversationEntry {
        self.entries.push(ConversationEntry::new(role, content));
        &self.entries[self.entries.len() - 1]
    }

    /// Append a completed exchange: the user entry (skipped when blank) then the assistant entry.
    /// Returns the appended entries.
    pub fn append_exchange(&mut self, user: &str, assistant: &str) -> Vec<ConversationEntry> {
        let start = self.entries.len();
        let user = user.trim();
        if !user.is_empty() {
            self.entries.push(ConversationEntry::new(Role::User, user));
        }
        self.entries
            .push(ConversationEntry::new(Role::Assistant, assistant));
        self.entries[start..].to_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_appends_user_then_assistant() {
        let mut h = ConversationHistory::new();
        let added = h.append_exchange("Hello", "Hi there");
        assert_eq!(added.len(), 2);
        assert_eq!(added[0].role(), Role::User);
        assert_eq!(added[1].content(), "Hi there");
        assert!(added[0].timestamp() <= added[1].timestamp());
        assert_ne!(added[0].id(), added[1].id());
    }

    #[test]
    fn blank_user_text_is_skipped() {
        let mut h = ConversationHistory::new();
        h.append_exchange("   ", "Anyone there?");
        assert_eq!(h.len(), 1);
        assert_eq!(h.iter().next().map(|e| e.role()), Some(Role::Assistant));
    }

    #[test]
    fn append_single_entry() {
        let mut h = ConversationHistory::new();
        let id = h.append(Role::User, "typed note").id();
        assert_eq!(h.entries()[0].id(), id);
        assert!(!h.is_empty());
    }
}
