//! Browser implementations of the speech device, audio sink and playback view.

use crate::core::audio::AudioClip;
use crate::core::error::AppError;
use crate::services::playback::{Notice, PlaybackView};
use crate::services::tts::{AudioSink, DeviceError, DeviceVoice, SpeechDevice, Utterance};
use crate::utils::listener::{HandlerSlot, Registered};
use crate::utils::time::sleep;
use async_trait::async_trait;
use leptos::*;
use std::cell::{Cell, RefCell};
use std::time::Duration;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    Blob, BlobPropertyBag, Element, HtmlAudioElement, ScrollBehavior, ScrollIntoViewOptions,
    ScrollLogicalPosition, SpeechSynthesis, SpeechSynthesisErrorCode, SpeechSynthesisErrorEvent,
    SpeechSynthesisUtterance, SpeechSynthesisVoice, Url,
};

const CANCELED: &str = "canceled";
const TOAST_TIME: Duration = Duration::from_secs(3);

fn js_error(value: JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

/// An `on*` property of `target`, addressed through its getter and setter.
struct EventSlot<E> {
    target: E,
    get: fn(&E) -> Option<js_sys::Function>,
    set: fn(&E, Option<&js_sys::Function>),
}

impl<E, T: ?Sized> HandlerSlot<Closure<T>> for EventSlot<E> {
    fn attach(&self, handler: &Closure<T>) {
        let handler: &JsValue = handler.as_ref();
        (self.set)(&self.target, Some(handler.unchecked_ref()));
    }

    fn holds(&self, handler: &Closure<T>) -> bool {
        let handler: &JsValue = handler.as_ref();
        (self.get)(&self.target).is_some_and(|current| JsValue::from(current) == *handler)
    }

    fn detach(&self) {
        (self.set)(&self.target, None);
    }
}

type Handler<T> = Registered<EventSlot<T>, Closure<dyn FnMut()>>;

// --- speechSynthesis ---

pub struct BrowserSpeech {
    synth: SpeechSynthesis,
}

impl BrowserSpeech {
    /// `None` when the browser has no speech synthesis.
    pub fn detect() -> Option<Self> {
        let synth = web_sys::window()?.speech_synthesis().ok()?;
        Some(Self { synth })
    }

    fn device_voices(&self) -> Vec<SpeechSynthesisVoice> {
        self.synth
            .get_voices()
            .iter()
            .filter_map(|v| v.dyn_into::<SpeechSynthesisVoice>().ok())
            .collect()
    }
}

#[async_trait(?Send)]
impl SpeechDevice for BrowserSpeech {
    fn voices(&self) -> Vec<DeviceVoice> {
        self.device_voices()
            .into_iter()
            .map(|v| DeviceVoice {
                name: v.name(),
                lang: v.lang(),
            })
            .collect()
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), DeviceError> {
        let speech = SpeechSynthesisUtterance::new_with_text(&utterance.text)
            .map_err(|e| DeviceError::Failed(js_error(e)))?;
        speech.set_lang(&utterance.lang);
        speech.set_rate(utterance.rate);
        speech.set_pitch(utterance.pitch);
        speech.set_volume(utterance.volume);
        if let Some(name) = &utterance.voice {
            let voice = self.device_voices().into_iter().find(|v| &v.name() == name);
            speech.set_voice(voice.as_ref());
        }

        let mut on_end: Option<Handler<SpeechSynthesisUtterance>> = None;
        let mut on_error: Option<Registered<EventSlot<SpeechSynthesisUtterance>, _>> = None;
        let finished = js_sys::Promise::new(&mut |resolve, _reject| {
            let done = resolve.clone();
            let end = Closure::<dyn FnMut()>::new(move || {
                let _ = done.call0(&JsValue::NULL);
            });
            let error = Closure::<dyn FnMut(SpeechSynthesisErrorEvent)>::new(
                move |event: SpeechSynthesisErrorEvent| {
                    let code = match event.error() {
                        SpeechSynthesisErrorCode::Canceled | SpeechSynthesisErrorCode::Interrupted => {
                            CANCELED.to_string()
                        }
                        other => format!("{:?}", other),
                    };
                    let _ = resolve.call1(&JsValue::NULL, &JsValue::from_str(&code));
                },
            );
            on_end = Some(Registered::new(
                EventSlot {
                    target: speech.clone(),
                    get: |s| s.onend(),
                    set: |s, f| s.set_onend(f),
                },
                end,
            ));
            on_error = Some(Registered::new(
                EventSlot {
                    target: speech.clone(),
                    get: |s| s.onerror(),
                    set: |s, f| s.set_onerror(f),
                },
                error,
            ));
        });

        self.synth.speak(&speech);
        let outcome = JsFuture::from(finished).await;
        drop(on_end);
        drop(on_error);

        match outcome.map(|v| v.as_string()) {
            Ok(None) => Ok(()),
            Ok(Some(code)) if code == CANCELED => Err(DeviceError::Canceled),
            Ok(Some(code)) => Err(DeviceError::Failed(code)),
            Err(e) => Err(DeviceError::Failed(js_error(e))),
        }
    }

    fn cancel(&self) {
        self.synth.cancel();
    }
}

// --- <audio> ---

pub struct HtmlAudioSink {
    audio: HtmlAudioElement,
    object_url: RefCell<Option<String>>,
}

impl HtmlAudioSink {
    pub fn new() -> Result<Self, AppError> {
        let audio = HtmlAudioElement::new().map_err(|e| AppError::Capability(js_error(e)))?;
        Ok(Self {
            audio,
            object_url: RefCell::new(None),
        })
    }

    fn load(&self, clip: &AudioClip) -> Result<(), JsValue> {
        let parts = js_sys::Array::new();
        parts.push(&js_sys::Uint8Array::from(clip.bytes.as_ref()));
        let options = BlobPropertyBag::new();
        options.set_type(&clip.content_type);
        let blob = Blob::new_with_u8_array_sequence_and_options(&parts, &options)?;
        let url = Url::create_object_url_with_blob(&blob)?;

        self.audio.set_src(&url);
        if let Some(old) = self.object_url.replace(Some(url)) {
            let _ = Url::revoke_object_url(&old);
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl AudioSink for HtmlAudioSink {
    async fn play(&self, clip: &AudioClip) -> Result<(), AppError> {
        let failed = || AppError::Playback("音频播放失败".to_string());
        self.load(clip).map_err(|e| {
            log::error!("Failed to load audio: {}", js_error(e));
            failed()
        })?;

        // Dropped on every exit, including an abort while waiting.
        let mut on_ended: Option<Handler<HtmlAudioElement>> = None;
        let mut on_error: Option<Handler<HtmlAudioElement>> = None;
        let finished = js_sys::Promise::new(&mut |resolve, reject| {
            let ended = Closure::<dyn FnMut()>::new(move || {
                let _ = resolve.call0(&JsValue::NULL);
            });
            let error = Closure::<dyn FnMut()>::new(move || {
                let _ = reject.call0(&JsValue::NULL);
            });
            on_ended = Some(Registered::new(
                EventSlot {
                    target: self.audio.clone(),
                    get: |a| a.onended(),
                    set: |a, f| a.set_onended(f),
                },
                ended,
            ));
            on_error = Some(Registered::new(
                EventSlot {
                    target: self.audio.clone(),
                    get: |a| a.onerror(),
                    set: |a, f| a.set_onerror(f),
                },
                error,
            ));
        });

        let started = match self.audio.play() {
            Ok(promise) => JsFuture::from(promise).await.map(|_| ()),
            Err(e) => Err(e),
        };
        let outcome = match started {
            Ok(()) => JsFuture::from(finished).await.map(|_| ()),
            Err(e) => Err(e),
        };

        drop(on_ended);
        drop(on_error);
        outcome.map_err(|_| failed())
    }

    fn stop(&self) {
        let _ = self.audio.pause();
        self.audio.set_current_time(0.0);
    }
}

// --- view ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    /// CSS modifier: "info", "success" or "error".
    pub kind: &'static str,
}

/// Playback view writing into leptos signals and the script markup.
pub struct SignalView {
    now_playing: WriteSignal<String>,
    playing: WriteSignal<bool>,
    toast: RwSignal<Option<Toast>>,
    next_toast: Cell<u64>,
}

impl SignalView {
    pub fn new(
        now_playing: WriteSignal<String>,
        playing: WriteSignal<bool>,
        toast: RwSignal<Option<Toast>>,
    ) -> Self {
        Self {
            now_playing,
            playing,
            toast,
            next_toast: Cell::new(0),
        }
    }

    pub fn show_toast(&self, message: impl Into<String>, kind: &'static str) {
        let id = self.next_toast.get() + 1;
        self.next_toast.set(id);
        self.toast.set(Some(Toast {
            id,
            message: message.into(),
            kind,
        }));

        let toast = self.toast;
        spawn_local(async move {
            sleep(TOAST_TIME).await;
            // A newer toast keeps its own timer.
            if toast.get_untracked().map(|t| t.id) == Some(id) {
                toast.set(None);
            }
        });
    }

    fn segment_elements(selector: &str) -> Vec<Element> {
        let Some(document) = web_sys::window().and_then(|w| w.document()) else {
            return Vec::new();
        };
        let Ok(nodes) = document.query_selector_all(selector) else {
            return Vec::new();
        };
        (0..nodes.length())
            .filter_map(|i| nodes.item(i))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect()
    }
}

impl PlaybackView for SignalView {
    fn set_now_playing(&self, label: &str) {
        self.now_playing.set(label.to_string());
    }

    fn set_playing(&self, playing: bool) {
        self.playing.set(playing);
    }

    fn highlight(&self, index: usize) {
        self.clear_highlight();
        let selector = format!("#scriptContent [data-segment=\"{}\"]", index);
        if let Some(element) = Self::segment_elements(&selector).into_iter().next() {
            let _ = element.class_list().add_1("playing");
            let options = ScrollIntoViewOptions::new();
            options.set_behavior(ScrollBehavior::Smooth);
            options.set_block(ScrollLogicalPosition::Center);
            element.scroll_into_view_with_scroll_into_view_options(&options);
        }
    }

    fn clear_highlight(&self) {
        for element in Self::segment_elements("#scriptContent [data-segment].playing") {
            let _ = element.class_list().remove_1("playing");
        }
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Info(message) => self.show_toast(message, "info"),
            Notice::Error(message) => self.show_toast(message, "error"),
            Notice::Finished => self.show_toast("🌙 故事讲完啦，晚安～", "success"),
        }
    }
}
