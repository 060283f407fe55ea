use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable the API credential is read from.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Debounce floor for the capture chord; OS key-repeat fires faster than this.
pub const MIN_TRIGGER_COOLDOWN_MS: u64 = 500;

/// Upper bound on remembered turns per capture cycle.
pub const MAX_TURNS_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("invalid key binding '{0}': {1}")]
    InvalidKeyBinding(String, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub vision_model: String,
    pub fast_model: String,
    pub api_base_url: String,
    pub vision_max_tokens: u32,
    pub fast_max_tokens: u32,
    pub temperature: f32,
    pub image_detail: String,
    pub upload_max_width: u32,
    pub request_timeout_secs: u64,
    pub capture_chord: String,
    pub cancel_key: String,
    pub trigger_cooldown_ms: u64,
    pub max_turns: usize,
    pub screenshots_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vision_model: "gpt-4o".to_string(),
            fast_model: "gpt-4o-mini".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            vision_max_tokens: 300,
            fast_max_tokens: 300,
            temperature: 0.7,
            image_detail: "auto".to_string(),
            upload_max_width: 1280,
            request_timeout_secs: 30,
            capture_chord: "Meta+§".to_string(),
            cancel_key: "Escape".to_string(),
            trigger_cooldown_ms: MIN_TRIGGER_COOLDOWN_MS,
            max_turns: 5,
            screenshots_dir: PathBuf::from("screenshots"),
        }
    }
}

impl AppConfig {
    /// Reads `config.json` from `config_dir`, writing defaults on first run.
    pub fn load(config_dir: &Path) -> Self {
        let config_path = config_dir.join("config.json");
        let config: Self = if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    log::warn!(
                        "Ignoring unreadable config {}: {}",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }),
                Err(e) => {
                    log::warn!("Cannot read config {}: {}", config_path.display(), e);
                    Self::default()
                }
            }
        } else {
            let c = Self::default();
            c.save(config_dir);
            c
        };

        config.normalized()
    }

    pub fn save(&self, config_dir: &Path) {
        if std::fs::create_dir_all(config_dir).is_err() {
            return;
        }
        let config_path = config_dir.join("config.json");
        if let Ok(content) = serde_json::to_string_pretty(self) {
            std::fs::write(config_path, content).ok();
        }
    }

    /// Clamps values that must stay within working bounds.
    pub fn normalized(mut self) -> Self {
        self.trigger_cooldown_ms = self.trigger_cooldown_ms.max(MIN_TRIGGER_COOLDOWN_MS);
        self.max_turns = self.max_turns.clamp(1, MAX_TURNS_LIMIT);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self
    }

    pub fn trigger_cooldown(&self) -> Duration {
        Duration::from_millis(self.trigger_cooldown_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Directory holding `config.json`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("snapask"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// The model service credential. `Debug` never prints the secret.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn resolve(value: Option<String>) -> Result<Self, ConfigError> {
        match value {
            Some(key) if !key.trim().is_empty() => Ok(Self(key.trim().to_string())),
            _ => Err(ConfigError::MissingApiKey),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}
