use crate::core::api::{ErrorBody, HEALTH_PATH, SUMMARIZE_PATH, TTS_PATH};
use crate::core::config::Config;
use crate::core::error::AppError;
use crate::services::generation::ScriptGenerator;
use crate::services::llm::create_llm;
use crate::services::speech::{OpenAISpeechClient, SpeechProvider};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

pub mod handlers;
pub mod rate_limit;

use rate_limit::RateLimiter;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub generator: Arc<ScriptGenerator>,
    pub speech: Arc<dyn SpeechProvider>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, generator: ScriptGenerator, speech: Arc<dyn SpeechProvider>) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            config: Arc::new(config),
            generator: Arc::new(generator),
            speech,
            limiter,
        }
    }

    /// State backed by the real upstream clients.
    pub fn from_config(config: Config) -> Self {
        let generator = ScriptGenerator::new(Arc::from(create_llm(&config.openai)));
        let speech = Arc::new(OpenAISpeechClient::new(&config.openai));
        Self::new(config, generator, speech)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.server.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route(SUMMARIZE_PATH, post(handlers::summarize_book))
        .route(TTS_PATH, post(handlers::tts))
        .route(HEALTH_PATH, get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit::enforce,
        ));

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .merge(api)
        .fallback_service(ServeDir::new(&state.config.server.public_dir))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::from_config(config);
    let config = state.config.clone();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🌙 Storyteller listening on http://{}", addr);
    info!("Model: {} | TTS: {} / {}", config.openai.model, config.tts.model, config.tts.voice);
    info!(
        "Limits: {}MB per file, {} requests per {} ms",
        config.max_file_size_mb(),
        config.rate_limit.max_requests,
        config.rate_limit.window_ms
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;
    Ok(())
}
