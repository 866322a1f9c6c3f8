use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Greeting seeded into every new conversation unless configured otherwise
pub const DEFAULT_GREETING: &str =
    "Welcome! I’m Pocket Pharmacist. Ask me anything about drugs, interactions, or side effects.";

/// Environment variable overriding `chatbot.base_url`
pub const API_URL_ENV: &str = "POCKET_PHARMACIST_API_URL";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// First bot message of a new conversation; an empty string disables it
    #[serde(default = "default_greeting")]
    pub greeting: Option<String>,

    /// Chatbot backend settings
    #[serde(default)]
    pub chatbot: ChatbotConfig,

    /// Where conversations are kept
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Chatbot backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatbotConfig {
    pub base_url: String,
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Which request/response shape the backend speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `POST /api/chat` with `{sessionId, timestamp, text, context}`
    #[default]
    Chat,
    /// `POST /api/submit_query` with `{query, language, session_id}`
    Query,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

fn default_greeting() -> Option<String> {
    Some(DEFAULT_GREETING.to_string())
}

fn default_timeout_secs() -> u64 {
    60
}

fn app_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pocket-pharmacist")
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            wire_format: WireFormat::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: app_home().join("conversations"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            greeting: default_greeting(),
            chatbot: ChatbotConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".pocket-pharmacist").join("config.toml"))
    }

    /// Load configuration from the default location, writing defaults on first run
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_or_init(&path, std::env::var(API_URL_ENV).ok())
    }

    /// Load configuration from `path`, falling back to defaults if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            Self::read(path)?
        } else {
            Config::default()
        };
        Ok(config.with_base_url(std::env::var(API_URL_ENV).ok()))
    }

    // The override is applied after the defaults are written so it never
    // ends up in the file.
    fn load_or_init(path: &Path, base_url: Option<String>) -> Result<Self> {
        let config = if path.exists() {
            Self::read(path)?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };
        Ok(config.with_base_url(base_url))
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    fn with_base_url(mut self, base_url: Option<String>) -> Self {
        if let Some(url) = base_url.filter(|url| !url.trim().is_empty()) {
            self.chatbot.base_url = url;
        }
        self
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Greeting for new conversations, if any
    pub fn greeting(&self) -> Option<&str> {
        self.greeting.as_deref().filter(|g| !g.trim().is_empty())
    }

    /// Full URL of the chat endpoint for the configured wire format
    pub fn endpoint_url(&self) -> String {
        let base = self.chatbot.base_url.trim_end_matches('/');
        match self.chatbot.wire_format {
            WireFormat::Chat => format!("{}/api/chat", base),
            WireFormat::Query => format!("{}/api/submit_query", base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.chatbot.base_url, "http://localhost:8000");
        assert_eq!(config.chatbot.wire_format, WireFormat::Chat);
        assert_eq!(config.chatbot.timeout_secs, 60);
        assert_eq!(config.greeting.as_deref(), Some(DEFAULT_GREETING));
    }

    #[test]
    fn parses_query_format_and_data_dir() {
        let config = Config::parse(
            r#"
greeting = "Hi"

[chatbot]
base_url = "https://pharm.example.com/"
wire_format = "query"

[storage]
data_dir = "/tmp/pp"
"#,
        )
        .unwrap();

        assert_eq!(config.greeting.as_deref(), Some("Hi"));
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/pp"));
        assert_eq!(
            config.endpoint_url(),
            "https://pharm.example.com/api/submit_query"
        );
    }

    #[test]
    fn empty_greeting_disables_it() {
        let config = Config::parse("greeting = \"\"\n").unwrap();
        assert_eq!(config.greeting(), None);
    }

    #[test]
    fn chat_endpoint_url() {
        let config = Config::default();
        assert_eq!(config.endpoint_url(), "http://localhost:8000/api/chat");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.chatbot.timeout_secs = 5;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.chatbot.timeout_secs, 5);
        assert_eq!(loaded.storage.data_dir, config.storage.data_dir);
    }

    #[test]
    fn first_run_writes_defaults_without_url_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config =
            Config::load_or_init(&path, Some("http://pharmacy.internal:9000".to_string())).unwrap();
        assert_eq!(config.chatbot.base_url, "http://pharmacy.internal:9000");

        let written = Config::parse(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.chatbot.base_url, "http://localhost:8000");

        let reloaded = Config::load_or_init(&path, None).unwrap();
        assert_eq!(reloaded.chatbot.base_url, "http://localhost:8000");
    }

    #[test]
    fn blank_url_override_is_ignored() {
        let config = Config::default().with_base_url(Some("  ".to_string()));
        assert_eq!(config.chatbot.base_url, "http://localhost:8000");
    }

    #[test]
    fn rejects_unknown_wire_format() {
        let err = Config::parse("[chatbot]\nbase_url = \"x\"\nwire_format = \"grpc\"\n");
        assert!(err.is_err());
    }
}
