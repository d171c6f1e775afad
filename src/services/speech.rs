use crate::core::audio::AudioFormat;
use crate::core::config::{OpenAIConfig, TtsConfig};
use crate::core::error::AppError;
use crate::services::llm::api_error;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use serde::Serialize;
use std::fmt::Debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(rename = "response_format")]
    pub format: AudioFormat,
    pub speed: f32,
}

impl SpeechRequest {
    /// Fills whatever the caller left out from the configured defaults.
    pub fn with_defaults(
        config: &TtsConfig,
        input: String,
        voice: Option<String>,
        format: Option<AudioFormat>,
        speed: Option<f32>,
    ) -> Self {
        Self {
            model: config.model.clone(),
            input,
            voice: voice.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| config.voice.clone()),
            format: format.unwrap_or(config.format),
            speed: speed.unwrap_or(config.speed),
        }
    }
}

/// Upstream text-to-speech.
#[async_trait]
pub trait SpeechProvider: Send + Sync + Debug {
    async fn speech(&self, request: &SpeechRequest) -> Result<Bytes, AppError>;
}

#[derive(Debug)]
pub struct OpenAISpeechClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAISpeechClient {
    pub fn new(config: &OpenAIConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechProvider for OpenAISpeechClient {
    async fn speech(&self, request: &SpeechRequest) -> Result<Bytes, AppError> {
        let url = format!("{}/audio/speech", self.base_url);
        debug!(
            "Speech request: model={} voice={} format={:?} chars={}",
            request.model,
            request.voice,
            request.format,
            request.input.chars().count()
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("TTS 请求失败: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            warn!("OpenAI speech failed with {}", status);
            return Err(api_error(status.as_u16(), &error_text));
        }

        resp.bytes()
            .await
            .map_err(|e| AppError::Upstream(format!("TTS 音频读取失败: {}", e)))
    }
}
