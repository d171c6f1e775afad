//! JSON bodies exchanged between the page and the server.

use crate::core::audio::AudioFormat;
use crate::core::script::Script;
use serde::{Deserialize, Serialize};

pub const SUMMARIZE_PATH: &str = "/api/summarize-book";
pub const TTS_PATH: &str = "/api/tts";
pub const HEALTH_PATH: &str = "/api/health";

/// The speech endpoint refuses anything longer than this.
pub const MAX_TTS_INPUT_CHARS: usize = 4096;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMeta {
    pub model: String,
    pub filename: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

/// A script together with how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedScript {
    pub script: Script,
    pub meta: GenerationMeta,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SummarizeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Script>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<GenerationMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<GeneratedScript> for SummarizeResponse {
    fn from(generated: GeneratedScript) -> Self {
        Self {
            success: true,
            data: Some(generated.script),
            meta: Some(generated.meta),
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(rename = "retryAfter", default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            retry_after: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TtsPayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub config: HealthConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    pub max_file_size: String,
    pub model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub rate_limit: RateLimitSnapshot,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub max: u32,
    pub window_ms: u64,
}
