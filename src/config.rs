//! Configuration file support.
//!
//! Loads settings from ~/.quill/config.toml with environment-variable
//! fallback for API keys. The orchestrator, registry, and providers all
//! take their settings explicitly; nothing reads ambient global state.

use serde::Deserialize;
use std::path::PathBuf;

/// Which hosted model backend drives the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenAi,
    Anthropic,
}

/// Settings for the chat core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Active provider backend.
    pub provider: ProviderKind,

    /// API keys (fall back to GEMINI_API_KEY / OPENAI_API_KEY /
    /// ANTHROPIC_API_KEY when absent).
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,

    /// Model override; each provider has a sensible default.
    pub model: Option<String>,

    /// Vault-relative folder where chat logs live.
    pub history_folder: String,

    /// User-configured behavioral rules appended to the system prompt.
    pub rules: Vec<String>,

    /// Propose a chat title from the first message.
    pub auto_title: bool,

    /// Caption inline images when reading notes (large base64 payloads
    /// cannot travel back to the model as tool results).
    pub caption_images: bool,

    /// Upper bound on tool-continuation rounds within one turn.
    pub max_tool_rounds: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            gemini_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
            model: None,
            history_folder: "quill-chats".into(),
            rules: Vec::new(),
            auto_title: true,
            caption_images: false,
            max_tool_rounds: 8,
        }
    }
}

impl Settings {
    /// Load settings from ~/.quill/config.toml, falling back to defaults.
    pub fn load() -> Self {
        let path = config_path();

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Get a value with fallback to an environment variable.
    pub fn get_or_env(&self, field: Option<&String>, env_var: &str) -> Option<String> {
        field.cloned().or_else(|| std::env::var(env_var).ok())
    }

    /// Resolve the API key for the active provider.
    pub fn api_key(&self) -> Option<String> {
        match self.provider {
            ProviderKind::Gemini => self.get_or_env(self.gemini_api_key.as_ref(), "GEMINI_API_KEY"),
            ProviderKind::OpenAi => self.get_or_env(self.openai_api_key.as_ref(), "OPENAI_API_KEY"),
            ProviderKind::Anthropic => {
                self.get_or_env(self.anthropic_api_key.as_ref(), "ANTHROPIC_API_KEY")
            }
        }
    }
}

/// Get the config file path.
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".quill")
        .join("config.toml")
}
