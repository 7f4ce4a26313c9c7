use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{caching, defaults, endpoints, limits, models};
use crate::context::{HistoryProjector, MimeAllowList, MimeCategory};
use crate::error::{ChatError, Result};

/// Per-request generation parameters. Read by the request builder, changed
/// only through the validating setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking_budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_instruction: Option<String>,
    #[serde(default)]
    grounding_enabled: bool,
    /// Name of a provider-side context cache to answer from.
    #[serde(skip)]
    cached_content: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: defaults::TEMPERATURE,
            top_p: defaults::TOP_P,
            thinking_budget: None,
            system_instruction: None,
            grounding_enabled: false,
            cached_content: None,
        }
    }
}

impl GenerationConfig {
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }

    pub fn thinking_budget(&self) -> Option<u32> {
        self.thinking_budget
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn grounding_enabled(&self) -> bool {
        self.grounding_enabled
    }

    pub fn cached_content(&self) -> Option<&str> {
        self.cached_content.as_deref()
    }

    pub fn set_temperature(&mut self, value: f32) -> Result<()> {
        self.temperature = unit_interval("temperature", value)?;
        Ok(())
    }

    pub fn set_top_p(&mut self, value: f32) -> Result<()> {
        self.top_p = unit_interval("top_p", value)?;
        Ok(())
    }

    pub fn set_thinking_budget(&mut self, budget: Option<u32>) -> Result<()> {
        if let Some(b) = budget {
            if b > limits::MAX_THINKING_BUDGET {
                return Err(ChatError::Config(format!(
                    "thinking_budget must be at most {}, got {b}",
                    limits::MAX_THINKING_BUDGET
                )));
            }
        }
        self.thinking_budget = budget;
        Ok(())
    }

    /// Blank instructions clear the setting.
    pub fn set_system_instruction(&mut self, instruction: Option<String>) {
        self.system_instruction = instruction.filter(|s| !s.trim().is_empty());
    }

    pub fn set_grounding(&mut self, enabled: bool) {
        self.grounding_enabled = enabled;
    }

    pub fn with_cached_content(mut self, cache_name: impl Into<String>) -> Self {
        self.cached_content = Some(cache_name.into());
        self
    }

    /// Check values that may have come from a hand-edited file.
    pub fn validate(&self) -> Result<()> {
        unit_interval("temperature", self.temperature)?;
        unit_interval("top_p", self.top_p)?;
        match self.thinking_budget {
            Some(b) if b > limits::MAX_THINKING_BUDGET => Err(ChatError::Config(format!(
                "thinking_budget must be at most {}, got {b}",
                limits::MAX_THINKING_BUDGET
            ))),
            _ => Ok(()),
        }
    }
}

fn unit_interval(name: &str, value: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ChatError::Config(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub attachments: AttachmentSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub model: String,
    pub api_key_env: String,
    /// Explicit credential; wins over the environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentSettings {
    pub categories: Vec<MimeCategory>,
    #[serde(default)]
    pub extra_mime_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub rollback_user_turn_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    pub default_ttl_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: models::DEFAULT_MODEL.to_string(),
            api_key_env: defaults::API_KEY_ENV.to_string(),
            api_key: None,
            base_url: endpoints::GEMINI_BASE_URL.to_string(),
        }
    }
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            categories: MimeCategory::all(),
            extra_mime_types: Vec::new(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            rollback_user_turn_on_failure: defaults::ROLLBACK_USER_TURN_ON_FAILURE,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: caching::POLL_INTERVAL_SECS,
            max_wait_secs: caching::MAX_WAIT_SECS,
            default_ttl_secs: caching::DEFAULT_TTL_SECS,
        }
    }
}

impl CacheSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            generation: GenerationConfig::default(),
            attachments: AttachmentSettings::default(),
            session: SessionSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Settings {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("geminichat")
            .join("config.toml")
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings =
            toml::from_str(&content).map_err(|e| ChatError::Config(e.to_string()))?;
        settings.generation.validate()?;
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ChatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Explicit key first, then the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        if let Some(key) = self.provider.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        if self.provider.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.provider.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    pub fn require_api_key(&self) -> Result<String> {
        self.api_key().ok_or_else(|| {
            ChatError::Config(format!(
                "No API key: set {} or provider.api_key in {}",
                self.provider.api_key_env,
                Self::config_path().display()
            ))
        })
    }

    pub fn allow_list(&self) -> MimeAllowList {
        MimeAllowList::new(
            &self.attachments.categories,
            &self.attachments.extra_mime_types,
        )
    }

    pub fn build_projector(&self) -> HistoryProjector {
        HistoryProjector::new(self.allow_list())
    }

    /// Build the Gemini client from the provider section.
    pub fn build_client(&self) -> Result<crate::llm::GeminiClient> {
        let api_key = self.require_api_key()?;
        Ok(crate::llm::GeminiClient::new(api_key).with_base_url(&self.provider.base_url))
    }
}
