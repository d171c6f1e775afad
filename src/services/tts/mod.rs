use crate::core::audio::AudioClip;
use crate::core::config::SpeechConfig;
use crate::core::error::AppError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

pub mod local;
pub mod remote;

pub use local::{DeviceError, DeviceVoice, LocalSpeech, SpeechDevice};
pub use remote::{AudioSink, RemoteSpeech, SpeechApi};

#[cfg(target_arch = "wasm32")]
pub trait SpeechBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> SpeechBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait SpeechBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> SpeechBounds for T {}

/// Parameters for one on-device utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    /// Name of the device voice to use, `None` for the engine default.
    pub voice: Option<String>,
}

/// Something a backend knows how to play.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioHandle {
    Utterance(Utterance),
    Clip(Arc<AudioClip>),
}

/// Turns segment text into audio and plays it.
///
/// `play` resolves when the audio has finished. `halt` stops whatever this
/// backend is currently outputting and is safe to call when nothing plays.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait SpeechBackend: SpeechBounds {
    async fn synthesize(&self, text: &str) -> Result<AudioHandle, AppError>;
    async fn play(&self, handle: &AudioHandle) -> Result<(), AppError>;
    fn halt(&self);

    /// Drops anything cached for the current book.
    fn reset(&self) {}

    /// Whether `synthesize(text)` has to go over the network.
    fn will_fetch(&self, _text: &str) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// Platform pieces a backend may need. The page supplies browser-backed
/// implementations; tests supply fakes.
#[derive(Clone)]
pub struct SpeechOutputs {
    pub device: Option<Arc<dyn SpeechDevice>>,
    pub sink: Arc<dyn AudioSink>,
    pub api: Arc<dyn SpeechApi>,
}

pub fn create_speech_backend(
    config: &SpeechConfig,
    outputs: SpeechOutputs,
) -> Result<Arc<dyn SpeechBackend>> {
    info!("Initializing speech backend: {}", config.provider);
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalSpeech::new(outputs.device, &config.language))),
        "remote" => Ok(Arc::new(RemoteSpeech::new(outputs.api, outputs.sink))),
        _ => Err(anyhow!("Unknown speech provider: {}", config.provider)),
    }
}
