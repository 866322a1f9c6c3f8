use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Config, WireFormat};
use crate::error::{ChatError, Result};
use crate::model::ChatMessage;

/// One-shot exchange of a user utterance for a bot reply.
///
/// Implementations keep no state between calls and never retry. The caller
/// passes the full conversation context every time.
#[async_trait]
pub trait ChatbotGateway: Send + Sync {
    async fn send_message(&self, request: ChatMessage) -> Result<ChatMessage>;
}

/// HTTP client for the chatbot backend
#[derive(Clone)]
pub struct HttpChatbotGateway {
    client: reqwest::Client,
    endpoint: String,
    wire_format: WireFormat,
}

impl HttpChatbotGateway {
    pub fn new(endpoint: impl Into<String>, wire_format: WireFormat, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            wire_format,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.endpoint_url(),
            config.chatbot.wire_format,
            Duration::from_secs(config.chatbot.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, request: &ChatMessage) -> Result<serde_json::Value> {
        match self.wire_format {
            WireFormat::Chat => serde_json::to_value(request)
                .map_err(|e| ChatError::transport(format!("Failed to encode request: {}", e))),
            WireFormat::Query => Ok(serde_json::json!({
                "query": request.text,
                "language": "auto",
                "session_id": request.session_id,
            })),
        }
    }
}

#[async_trait]
impl ChatbotGateway for HttpChatbotGateway {
    async fn send_message(&self, request: ChatMessage) -> Result<ChatMessage> {
        let payload = self.request_body(&request)?;
        debug!(endpoint = %self.endpoint, session_id = %request.session_id, "Sending chat message");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChatError::transport(format!("Could not reach {}: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, "Chatbot backend returned an error");
            return Err(ChatError::transport(format!(
                "Chatbot API error ({}): {}",
                status, error_text
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChatError::transport(format!("Failed to read response body: {}", e)))?;

        decode_reply(&request, &body)
    }
}

/// Every reply shape the backend is known to produce
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplyBody {
    Chat(ChatMessage),
    Query { response: QueryResponse },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryResponse {
    Text(String),
    DrugInfo(DrugInfo),
}

/// Structured medication answer from the query endpoint
#[derive(Debug, Default, Deserialize)]
pub struct DrugInfo {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub generic_name: Option<String>,
    #[serde(default)]
    pub indications: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub dosage: Vec<String>,
}

impl DrugInfo {
    /// Renders the answer as labeled plain text.
    pub fn to_text(&self) -> String {
        if let Some(response) = self.response.as_deref().filter(|r| !r.is_empty()) {
            return response.to_string();
        }

        let mut text = String::new();
        if let Some(brand) = present(self.brand_name.as_deref()) {
            text.push_str(&format!("Medication: {}\n", brand));
        }
        if let Some(generic) = present(self.generic_name.as_deref()) {
            text.push_str(&format!("Generic Name: {}\n", generic));
        }
        for (label, entries) in [
            ("Uses", &self.indications),
            ("Warnings", &self.warnings),
            ("Dosage", &self.dosage),
        ] {
            if let Some(first) = present(entries.first().map(String::as_str)) {
                text.push_str(&format!("\n{}: {}\n", label, first));
            }
        }
        text.trim().to_string()
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decodes a 2xx body into the canonical reply for `request`.
///
/// Query-style replies carry no context, so the request's context is handed
/// back unchanged.
pub fn decode_reply(request: &ChatMessage, body: &str) -> Result<ChatMessage> {
    let reply: ReplyBody = serde_json::from_str(body)
        .map_err(|e| ChatError::transport(format!("Malformed chatbot response: {}", e)))?;

    match reply {
        ReplyBody::Chat(message) => Ok(message),
        ReplyBody::Query { response } => {
            let text = match response {
                QueryResponse::Text(text) => text,
                QueryResponse::DrugInfo(info) => info.to_text(),
            };
            Ok(ChatMessage {
                session_id: request.session_id.clone(),
                timestamp: Utc::now(),
                text,
                context: request.context.clone(),
            })
        }
    }
}

/// Offline gateway that answers every message with a canned echo
#[derive(Debug, Clone, Default)]
pub struct EchoChatbotGateway;

#[async_trait]
impl ChatbotGateway for EchoChatbotGateway {
    async fn send_message(&self, request: ChatMessage) -> Result<ChatMessage> {
        Ok(ChatMessage {
            session_id: request.session_id,
            timestamp: Utc::now(),
            text: format!("This is a mock response to your message: {}", request.text),
            context: request.context,
        })
    }
}
