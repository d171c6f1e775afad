use crate::core::error::AppError;
use crate::services::tts::{AudioHandle, SpeechBackend, SpeechBounds, Utterance};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceVoice {
    pub name: String,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The utterance was cancelled on purpose.
    Canceled,
    Failed(String),
}

/// On-device speech synthesis, e.g. the browser's `speechSynthesis`.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait SpeechDevice: SpeechBounds {
    fn voices(&self) -> Vec<DeviceVoice>;

    /// Resolves once the device reports the utterance finished.
    async fn speak(&self, utterance: &Utterance) -> Result<(), DeviceError>;

    fn cancel(&self);
}

pub struct LocalSpeech {
    device: Option<Arc<dyn SpeechDevice>>,
    language: String,
}

impl LocalSpeech {
    pub fn new(device: Option<Arc<dyn SpeechDevice>>, language: &str) -> Self {
        Self {
            device,
            language: language.to_string(),
        }
    }

    fn device(&self) -> Result<&Arc<dyn SpeechDevice>, AppError> {
        self.device.as_ref().ok_or_else(AppError::speech_unsupported)
    }

    /// First device voice speaking our language, if any.
    pub fn pick_voice(&self, voices: &[DeviceVoice]) -> Option<String> {
        voices
            .iter()
            .find(|v| same_language(&v.lang, &self.language))
            .map(|v| v.name.clone())
    }
}

fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase()
}

fn same_language(voice_lang: &str, target: &str) -> bool {
    let target = primary_subtag(target);
    !target.is_empty() && primary_subtag(voice_lang) == target
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SpeechBackend for LocalSpeech {
    async fn synthesize(&self, text: &str) -> Result<AudioHandle, AppError> {
        let device = self.device()?;
        let voice = self.pick_voice(&device.voices());
        if voice.is_none() {
            debug!("No {} voice on this device, using the engine default", self.language);
        }

        Ok(AudioHandle::Utterance(Utterance {
            text: text.to_string(),
            lang: self.language.clone(),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            voice,
        }))
    }

    async fn play(&self, handle: &AudioHandle) -> Result<(), AppError> {
        let device = self.device()?;
        let AudioHandle::Utterance(utterance) = handle else {
            return Err(AppError::Playback("本地语音无法播放音频文件".to_string()));
        };

        device.cancel();
        match device.speak(utterance).await {
            Ok(()) | Err(DeviceError::Canceled) => Ok(()),
            Err(DeviceError::Failed(reason)) => {
                warn!("Speech synthesis failed: {}", reason);
                Err(AppError::Playback(reason))
            }
        }
    }

    fn halt(&self) {
        if let Some(device) = &self.device {
            device.cancel();
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
