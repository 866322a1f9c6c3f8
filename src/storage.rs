//! Conversation persistence.

use async_trait::async_trait;
use chrono::{Local, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::model::{Conversation, Message, Sender};

/// Keeps conversation files apart from anything else in the data directory
const KEY_PREFIX: &str = "conversation_";
const FILE_EXTENSION: &str = "json";

/// Durable, keyed storage of conversations.
///
/// Every mutating call is durable when it returns. There is no caching and
/// no cross-call transaction; concurrent writers to the same id resolve as
/// last write wins.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Ids of every stored conversation, in no particular order.
    async fn list_ids(&self) -> Result<HashSet<String>>;

    /// Every stored conversation, in no particular order.
    async fn load_all(&self) -> Result<Vec<Conversation>>;

    /// Loads one conversation.
    ///
    /// Returns `Ok(None)` for unknown ids and for records that cannot be
    /// decoded. `Err` is reserved for the storage itself failing.
    async fn load(&self, id: &str) -> Result<Option<Conversation>>;

    /// Writes the full snapshot, replacing any earlier one with the same id.
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Allocates, persists and returns a fresh conversation.
    ///
    /// With a greeting, the conversation starts with one bot message at
    /// sequence 0.
    async fn create(&self, greeting: Option<&str>) -> Result<Conversation>;

    /// Removes a conversation. Unknown ids are a no-op.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Builds a new, not yet persisted conversation.
pub fn new_conversation(greeting: Option<&str>) -> Conversation {
    let now = Utc::now();
    let messages = greeting
        .map(|text| {
            vec![Message {
                sender: Sender::Bot,
                text: text.to_string(),
                timestamp: now,
                sequence: 0,
            }]
        })
        .unwrap_or_default();

    Conversation {
        id: Uuid::new_v4().to_string(),
        timestamp: now,
        name: now
            .with_timezone(&Local)
            .format("%-m/%-d/%Y, %-I:%M:%S %p")
            .to_string(),
        messages,
        context: None,
    }
}

/// Stores each conversation as `conversation_<id>.json` in one directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ChatError::persistence("Failed to create conversations directory", e))
    }

    /// Path for `id`, or `None` if the id could escape the directory.
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| {
            self.dir
                .join(format!("{}{}.{}", KEY_PREFIX, id, FILE_EXTENSION))
        })
    }

    fn id_from_path(path: &Path) -> Option<String> {
        if path.extension().and_then(|s| s.to_str()) != Some(FILE_EXTENSION) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        stem.strip_prefix(KEY_PREFIX)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    async fn read_record(&self, path: &Path) -> Result<Option<Conversation>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChatError::persistence("Failed to read conversation", e)),
        };

        match serde_json::from_str::<Conversation>(&content) {
            Ok(conversation) => Ok(Some(conversation)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed conversation record");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn list_ids(&self) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => {
                return Err(ChatError::persistence(
                    "Failed to read conversations directory",
                    e,
                ));
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ChatError::persistence("Failed to read directory entry", e))?
        {
            if let Some(id) = Self::id_from_path(&entry.path()) {
                ids.insert(id);
            }
        }

        Ok(ids)
    }

    async fn load_all(&self) -> Result<Vec<Conversation>> {
        let ids = self.list_ids().await?;
        let mut conversations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(conversation) = self.load(&id).await? {
                conversations.push(conversation);
            }
        }
        Ok(conversations)
    }

    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let Some(path) = self.path_for(id) else {
            debug!(id, "Rejecting invalid conversation id");
            return Ok(None);
        };
        self.read_record(&path).await
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let path = self.path_for(&conversation.id).ok_or_else(|| {
            ChatError::persistence(
                "Invalid conversation id",
                std::io::Error::new(std::io::ErrorKind::InvalidInput, conversation.id.clone()),
            )
        })?;
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(conversation)
            .map_err(|e| ChatError::persistence("Failed to serialize conversation", e))?;

        // Readers must never observe a half-written snapshot.
        let tmp_path = path.with_extension(format!("{}.{}.tmp", FILE_EXTENSION, Uuid::new_v4()));
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| ChatError::persistence("Failed to write conversation", e))?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ChatError::persistence("Failed to replace conversation", e));
        }

        debug!(id = %conversation.id, messages = conversation.messages.len(), "Saved conversation");
        Ok(())
    }

    async fn create(&self, greeting: Option<&str>) -> Result<Conversation> {
        let conversation = new_conversation(greeting);
        self.save(&conversation).await?;
        Ok(conversation)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id, "Deleted conversation");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChatError::persistence("Failed to delete conversation", e)),
        }
    }
}
