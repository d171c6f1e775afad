use crate::core::api::{
    HealthConfig, HealthResponse, RateLimitSnapshot, SummarizeResponse, TtsPayload, MAX_TTS_INPUT_CHARS,
};
use crate::core::config::Config;
use crate::core::error::AppError;
use crate::server::AppState;
use crate::services::generation::PdfDocument;
use crate::services::session::PDF_MIME;
use crate::services::speech::SpeechRequest;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use log::info;

const MIN_SPEED: f32 = 0.25;
const MAX_SPEED: f32 = 4.0;

fn file_too_large(config: &Config) -> AppError {
    AppError::PayloadTooLarge(format!("文件过大，最大支持 {}MB", config.max_file_size_mb()))
}

fn multipart_error(config: &Config, err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        file_too_large(config)
    } else {
        AppError::Validation(format!("上传失败: {}", err.body_text()))
    }
}

/// Pulls the `file` field out of the form.
async fn read_pdf(config: &Config, multipart: &mut Multipart) -> Result<PdfDocument, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(config, e))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if field.content_type() != Some(PDF_MIME) {
            return Err(AppError::Validation("只支持 PDF 文件".to_string()));
        }

        let filename = field.file_name().unwrap_or("document.pdf").to_string();
        let bytes = field.bytes().await.map_err(|e| multipart_error(config, e))?;
        if bytes.len() as u64 > config.server.max_file_size {
            return Err(file_too_large(config));
        }
        return Ok(PdfDocument {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    Err(AppError::Validation("请上传 PDF 文件".to_string()))
}

pub async fn summarize_book(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SummarizeResponse>, AppError> {
    let mut multipart = multipart.map_err(|_| AppError::Validation("请上传 PDF 文件".to_string()))?;
    let document = read_pdf(&state.config, &mut multipart).await?;
    let generated = state.generator.generate(&document).await?;
    Ok(Json(generated.into()))
}

pub async fn tts(
    State(state): State<AppState>,
    payload: Result<Json<TtsPayload>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(payload) =
        payload.map_err(|e| AppError::Validation(format!("请求格式不正确: {}", e.body_text())))?;

    let text = payload
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Validation("请提供要转换的文本".to_string()))?;
    let length = text.chars().count();
    if length > MAX_TTS_INPUT_CHARS {
        return Err(AppError::Validation(format!(
            "文本过长，单次请求最多 {} 字符",
            MAX_TTS_INPUT_CHARS
        )));
    }
    if let Some(speed) = payload.speed {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(AppError::Validation(format!(
                "语速必须在 {} 到 {} 之间",
                MIN_SPEED, MAX_SPEED
            )));
        }
    }

    info!("[TTS] converting {} characters", length);
    let request = SpeechRequest::with_defaults(
        &state.config.tts,
        text,
        payload.voice,
        payload.format,
        payload.speed,
    );
    let audio = state.speech.speech(&request).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(request.format.mime_type()));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(audio.len()));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok((headers, audio).into_response())
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = &state.config;
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        config: HealthConfig {
            max_file_size: format!("{}MB", config.max_file_size_mb()),
            model: config.openai.model.clone(),
            tts_model: config.tts.model.clone(),
            tts_voice: config.tts.voice.clone(),
            rate_limit: RateLimitSnapshot {
                max: config.rate_limit.max_requests,
                window_ms: config.rate_limit.window_ms,
            },
        },
    })
}
