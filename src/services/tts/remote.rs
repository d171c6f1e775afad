use crate::core::audio::AudioClip;
use crate::core::error::AppError;
use crate::services::tts::{AudioHandle, SpeechBackend, SpeechBounds};
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Text sent to the speech endpoint is cut to this many characters.
pub const MAX_REMOTE_CHARS: usize = 4000;
/// Cache entries are keyed by this many leading characters of the text.
pub const CACHE_KEY_CHARS: usize = 100;

/// Produces audio for a piece of text over the network.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait SpeechApi: SpeechBounds {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, AppError>;
}

/// Plays audio clips, e.g. an `<audio>` element.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait AudioSink: SpeechBounds {
    /// Resolves when the clip has played to the end.
    async fn play(&self, clip: &AudioClip) -> Result<(), AppError>;
    fn stop(&self);
}

/// Speech from the remote endpoint, cached for the lifetime of a book.
///
/// The cache is never evicted; it grows with every distinct segment until
/// [`SpeechBackend::reset`] is called for the next book.
pub struct RemoteSpeech {
    api: Arc<dyn SpeechApi>,
    sink: Arc<dyn AudioSink>,
    cache: Mutex<HashMap<String, Arc<AudioClip>>>,
}

impl RemoteSpeech {
    pub fn new(api: Arc<dyn SpeechApi>, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            api,
            sink,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_clips(&self) -> usize {
        self.cache.lock().len()
    }
}

pub fn cache_key(text: &str) -> String {
    text.chars().take(CACHE_KEY_CHARS).collect()
}

pub fn truncate_for_request(text: &str) -> &str {
    match text.char_indices().nth(MAX_REMOTE_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SpeechBackend for RemoteSpeech {
    async fn synthesize(&self, text: &str) -> Result<AudioHandle, AppError> {
        let key = cache_key(text);
        if let Some(clip) = self.cache.lock().get(&key).cloned() {
            debug!("Speech cache hit ({} bytes)", clip.len());
            return Ok(AudioHandle::Clip(clip));
        }

        let request_text = truncate_for_request(text);
        info!("Requesting remote speech for {} characters", request_text.chars().count());
        let clip = Arc::new(self.api.synthesize(request_text).await?);

        self.cache.lock().insert(key, clip.clone());
        Ok(AudioHandle::Clip(clip))
    }

    async fn play(&self, handle: &AudioHandle) -> Result<(), AppError> {
        match handle {
            AudioHandle::Clip(clip) => self.sink.play(clip).await,
            AudioHandle::Utterance(_) => {
                Err(AppError::Playback("远程语音无法播放本地朗读".to_string()))
            }
        }
    }

    fn halt(&self) {
        self.sink.stop();
    }

    fn reset(&self) {
        self.cache.lock().clear();
    }

    fn will_fetch(&self, text: &str) -> bool {
        !self.cache.lock().contains_key(&cache_key(text))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
