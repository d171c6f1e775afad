use crate::core::api::{ErrorBody, GeneratedScript, SummarizeResponse, SUMMARIZE_PATH, TTS_PATH};
use crate::core::audio::AudioClip;
use crate::core::error::AppError;
use crate::services::session::PdfUpload;
use crate::services::tts::{SpeechApi, SpeechBounds};
use async_trait::async_trait;
use log::{debug, error};
use serde_json::json;

/// Uploads a book and gets its script back.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait BookApi: SpeechBounds {
    async fn summarize_book(&self, upload: &PdfUpload) -> Result<GeneratedScript, AppError>;
}

/// Page-side client for our own HTTP API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Reads the `{success: false, error}` body of a failed call.
fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.error)
        .ok()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn status_error(status: u16, message: String) -> AppError {
    match status {
        400 => AppError::Validation(message),
        413 => AppError::PayloadTooLarge(message),
        429 => AppError::RateLimited(message),
        _ => AppError::Upstream(message),
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl BookApi for ApiClient {
    async fn summarize_book(&self, upload: &PdfUpload) -> Result<GeneratedScript, AppError> {
        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        debug!("Uploading {} ({} bytes)", upload.name, upload.bytes.len());
        let resp = self.client.post(self.url(SUMMARIZE_PATH)).multipart(form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = error_message(&body, "处理失败，请重试");
            error!("Summarize failed ({}): {}", status, message);
            return Err(status_error(status.as_u16(), message));
        }

        let response: SummarizeResponse = serde_json::from_str(&body)
            .map_err(|_| AppError::MalformedOutput("生成的内容格式不正确".to_string()))?;
        match (response.success, response.data, response.meta) {
            (true, Some(script), Some(meta)) => Ok(GeneratedScript { script, meta }),
            (_, _, _) => Err(AppError::Upstream(
                response.error.unwrap_or_else(|| "处理失败，请重试".to_string()),
            )),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SpeechApi for ApiClient {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, AppError> {
        let resp = self
            .client
            .post(self.url(TTS_PATH))
            .json(&json!({ "text": text }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), error_message(&body, "TTS 转换失败")));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = resp.bytes().await?;
        Ok(AudioClip::new(bytes, content_type))
    }
}
