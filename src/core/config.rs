use crate::core::audio::AudioFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.yml";

/// Server-side configuration.
///
/// Loaded from `config.yml` when present, then overridden by environment
/// variables (see [`Config::apply_env`]).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub openai: OpenAIConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_public_dir")]
    pub public_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TtsConfig {
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default)]
    pub format: AudioFormat,
    #[serde(default = "default_tts_speed")]
    pub speed: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_max")]
    pub max_requests: u32,
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
}

/// Page-side settings: which speech backend plays segments and how.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_base: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub speech: SpeechConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeechConfig {
    /// "remote" (speech endpoint) or "local" (on-device synthesis).
    #[serde(default = "default_speech_provider")]
    pub provider: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Pause between two segments during auto-advance.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_max_file_size() -> u64 {
    25 * 1024 * 1024
}
fn default_public_dir() -> String {
    "public".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_completion_tokens() -> u32 {
    8000
}
fn default_temperature() -> f32 {
    0.8
}
fn default_tts_model() -> String {
    "tts-1-hd".to_string()
}
fn default_tts_voice() -> String {
    "onyx".to_string()
}
fn default_tts_speed() -> f32 {
    1.0
}
fn default_rate_limit_max() -> u32 {
    10
}
fn default_rate_limit_window_ms() -> u64 {
    60_000
}
fn default_speech_provider() -> String {
    "remote".to_string()
}
fn default_language() -> String {
    "zh-CN".to_string()
}
fn default_pacing_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_file_size: default_max_file_size(),
            public_dir: default_public_dir(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            max_completion_tokens: default_max_completion_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: default_tts_model(),
            voice: default_tts_voice(),
            format: AudioFormat::default(),
            speed: default_tts_speed(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max(),
            window_ms: default_rate_limit_window_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            max_file_size: default_max_file_size(),
            speech: SpeechConfig::default(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: default_speech_provider(),
            language: default_language(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl Config {
    /// Reads `config.yml` if it exists, then applies the process environment.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(std::path::Path::new(CONFIG_FILE))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_file(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Environment variables win over the file. `lookup` is `std::env::var`
    /// in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = v.parse().context("PORT must be a port number")?;
        }
        if let Some(v) = lookup("MAX_FILE_SIZE") {
            self.server.max_file_size = v.parse().context("MAX_FILE_SIZE must be a byte count")?;
        }
        if let Some(v) = lookup("PUBLIC_DIR") {
            self.server.public_dir = v;
        }
        if let Some(v) = lookup("RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = v.parse().context("RATE_LIMIT_MAX must be a number")?;
        }
        if let Some(v) = lookup("RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = v
                .parse()
                .context("RATE_LIMIT_WINDOW_MS must be milliseconds")?;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.openai.model = v;
        }
        if let Some(v) = lookup("TTS_MODEL") {
            self.tts.model = v;
        }
        if let Some(v) = lookup("TTS_VOICE") {
            self.tts.voice = v;
        }
        if let Some(v) = lookup("TTS_FORMAT") {
            self.tts.format = AudioFormat::parse(&v)
                .with_context(|| format!("Unsupported TTS_FORMAT: {}", v))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.openai.api_key.trim().is_empty() {
            anyhow::bail!("OPENAI_API_KEY is not set. Put it in .env or config.yml.");
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_ms == 0 {
            anyhow::bail!("rate_limit.max_requests and rate_limit.window_ms must be positive");
        }
        Ok(())
    }

    pub fn max_file_size_mb(&self) -> u64 {
        self.server.max_file_size / 1024 / 1024
    }
}
