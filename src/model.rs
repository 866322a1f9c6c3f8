use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A single immutable entry in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

impl Message {
    pub fn user(text: impl Into<String>, sequence: u64) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
            timestamp: Utc::now(),
            sequence,
        }
    }

    pub fn bot(text: impl Into<String>, sequence: u64) -> Self {
        Self {
            sender: Sender::Bot,
            text: text.into(),
            timestamp: Utc::now(),
            sequence,
        }
    }
}

/// Continuation token issued by the backend.
///
/// Stored and forwarded verbatim. Nothing in this crate looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationContext(serde_json::Value);

impl From<serde_json::Value> for ConversationContext {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<&str> for ConversationContext {
    fn from(value: &str) -> Self {
        Self(serde_json::Value::String(value.to_string()))
    }
}

/// A named, persisted thread of messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ConversationContext>,
}

impl Conversation {
    /// Sequence number the next appended message must carry.
    ///
    /// A greeting occupies 0, so the first user message of an empty
    /// conversation starts at 1.
    pub fn next_sequence(&self) -> u64 {
        self.messages
            .last()
            .map(|message| message.sequence + 1)
            .unwrap_or(1)
    }

    /// Returns a new snapshot with `message` appended.
    pub fn with_message(&self, message: Message) -> Self {
        let mut next = self.clone();
        next.messages.push(message);
        next
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// The `{id, name}` projection shown in the conversation picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
}

/// Transport projection of one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ConversationContext>,
}

/// Newest-first ordering by creation time.
pub fn sort_newest_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
