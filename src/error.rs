//! Error types for the conversation core.

use thiserror::Error;

/// Every failure the conversation core can produce.
///
/// The orchestrator converts these into a single user-visible string; the
/// store and gateway return them directly.
#[derive(Error, Debug)]
pub enum ChatError {
    /// An operation needed state that is not there (no active conversation,
    /// a reply still pending).
    #[error("{0}")]
    Validation(String),

    /// Reading or writing the conversation store failed.
    #[error("Storage error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The chatbot backend could not be reached or answered badly.
    #[error("Chatbot request failed: {0}")]
    Transport(String),

    /// No conversation with this id exists in the store.
    #[error("Conversation with ID {id} not found")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn persistence(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            message: message.into(),
            source: Box::new(source),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Message plus the underlying cause, for the user-facing error line.
    pub fn describe(&self) -> String {
        use std::error::Error as _;
        match self.source() {
            Some(cause) => format!("{self} ({cause})"),
            None => self.to_string(),
        }
    }
}
