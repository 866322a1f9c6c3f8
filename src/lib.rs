//! Conversation core of the Pocket Pharmacist client.
//!
//! - [`storage`] persists conversations.
//! - [`gateway`] talks to the chatbot backend.
//! - [`orchestrator`] ties the two together for a chat front end.

pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod orchestrator;
pub mod storage;

pub use error::ChatError;
pub use gateway::{ChatbotGateway, EchoChatbotGateway, HttpChatbotGateway};
pub use model::{ChatMessage, Conversation, ConversationContext, ConversationSummary, Message, Sender};
pub use orchestrator::ConversationOrchestrator;
pub use storage::{ConversationStore, JsonFileStore};
