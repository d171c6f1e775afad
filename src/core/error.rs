use thiserror::Error;

/// Every failure a user can see, on the server and in the page.
///
/// The message carried by each variant is the text shown to the user, so it
/// must stay readable without any surrounding context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Rejected before any remote call: missing file, wrong MIME type,
    /// missing or overlong text.
    #[error("{0}")]
    Validation(String),

    /// The uploaded file exceeds the configured maximum size.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Either our own per-client quota or the upstream API's.
    #[error("{0}")]
    RateLimited(String),

    /// The remote generation or synthesis call failed.
    #[error("{0}")]
    Upstream(String),

    /// The model answered, but with nothing usable.
    #[error("{0}")]
    MalformedOutput(String),

    /// Network failure while talking to our own API.
    #[error("{0}")]
    Transport(String),

    /// The device cannot synthesize speech locally.
    #[error("{0}")]
    Capability(String),

    /// The device or the audio element reported an error mid-playback.
    #[error("{0}")]
    Playback(String),
}

impl AppError {
    pub fn speech_unsupported() -> Self {
        AppError::Capability("您的浏览器不支持语音合成".to_string())
    }

    /// HTTP status used when the error crosses the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::PayloadTooLarge(_) => 413,
            AppError::RateLimited(_) => 429,
            AppError::Upstream(_)
            | AppError::MalformedOutput(_)
            | AppError::Transport(_)
            | AppError::Capability(_)
            | AppError::Playback(_) => 500,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Transport(format!("网络请求失败: {}", err))
    }
}
