use crate::core::config::ClientConfig;
use crate::services::api_client::{ApiClient, BookApi};
use crate::services::playback::PlaybackController;
use crate::services::renderer::IDLE_LABEL;
use crate::services::session::Session;
use crate::services::tts::{create_speech_backend, SpeechDevice, SpeechOutputs};
use crate::utils::time::sleep;
use leptos::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use wasm_bindgen::JsCast;

pub mod browser;

use browser::{BrowserSpeech, HtmlAudioSink, SignalView, Toast};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Upload,
    Progress,
    Result,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Progress {
    percent: u8,
    title: &'static str,
    detail: &'static str,
}

impl Progress {
    const fn new(percent: u8, title: &'static str, detail: &'static str) -> Self {
        Self { percent, title, detail }
    }
}

const RECEIVED: Progress = Progress::new(20, "📤 收到啦", "正在打开这本书...");
const READING: Progress = Progress::new(40, "📖 正在阅读", "爸爸正在仔细读这本书...");
const COMPOSING: Progress = Progress::new(80, "✨ 正在构思", "把故事变得更有趣...");
const READY: Progress = Progress::new(100, "🌙 准备好了", "故事马上开始...");

/// Page settings: same-origin API, `?speech=local` picks on-device speech.
fn client_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    let Some(location) = web_sys::window().map(|w| w.location()) else {
        return config;
    };
    if let Ok(origin) = location.origin() {
        config.api_base = origin;
    }
    if location.search().map(|q| q.contains("speech=local")).unwrap_or(false) {
        config.speech.provider = "local".to_string();
    }
    config
}

struct Page {
    session: Rc<RefCell<Session>>,
    controller: PlaybackController,
    api: Arc<ApiClient>,
    view: Arc<SignalView>,
}

fn build_page(
    config: &ClientConfig,
    now_playing: WriteSignal<String>,
    playing: WriteSignal<bool>,
    toast: RwSignal<Option<Toast>>,
) -> Result<Page, String> {
    let api = Arc::new(ApiClient::new(&config.api_base));
    let view = Arc::new(SignalView::new(now_playing, playing, toast));
    let sink = Arc::new(HtmlAudioSink::new().map_err(|e| e.to_string())?);
    let device = BrowserSpeech::detect().map(|d| Arc::new(d) as Arc<dyn SpeechDevice>);

    let backend = create_speech_backend(
        &config.speech,
        SpeechOutputs {
            device,
            sink,
            api: api.clone(),
        },
    )
    .map_err(|e| e.to_string())?;

    let controller = PlaybackController::new(
        backend,
        view.clone(),
        Duration::from_millis(config.speech.pacing_ms),
    );
    let session = Rc::new(RefCell::new(Session::new(controller.clone(), config.max_file_size)));
    Ok(Page {
        session,
        controller,
        api,
        view,
    })
}

#[component]
pub fn App() -> impl IntoView {
    let config = client_config();
    let (now_playing, set_now_playing) = create_signal(IDLE_LABEL.to_string());
    let (playing, set_playing) = create_signal(false);
    let toast = create_rw_signal(None::<Toast>);

    let body = match build_page(&config, set_now_playing, set_playing, toast) {
        Ok(page) => view! {
            <Storyteller page=Rc::new(page) now_playing=now_playing playing=playing/>
        }
        .into_view(),
        Err(e) => view! { <p class="fatal">"页面初始化失败: " {e}</p> }.into_view(),
    };

    view! {
        <div class="app-container">
            <header class="app-header">
                <h1>"🌙 爸爸说书"</h1>
                <p class="subtitle">"上传一本书，听一个睡前故事"</p>
            </header>
            {body}
            {move || toast.get().map(|t| view! {
                <div class=format!("toast {} show", t.kind)>{t.message}</div>
            })}
        </div>
    }
}

#[component]
fn Storyteller(page: Rc<Page>, now_playing: ReadSignal<String>, playing: ReadSignal<bool>) -> impl IntoView {
    let (stage, set_stage) = create_signal(Stage::Upload);
    let (progress, set_progress) = create_signal(RECEIVED);
    let (selected, set_selected) = create_signal(None::<(String, String)>);
    let (script_html, set_script_html) = create_signal(String::new());
    let (duration, set_duration) = create_signal(None::<String>);
    let page = store_value(page);

    let (dragging, set_dragging) = create_signal(false);

    let load_file = move |file: web_sys::File| {
        spawn_local(async move {
            let bytes = match wasm_bindgen_futures::JsFuture::from(file.array_buffer()).await {
                Ok(buffer) => js_sys::Uint8Array::new(&buffer).to_vec(),
                Err(_) => {
                    page.with_value(|p| p.view.show_toast("读取文件失败", "error"));
                    return;
                }
            };
            page.with_value(|p| {
                let Ok(mut session) = p.session.try_borrow_mut() else {
                    return;
                };
                match session.select_file(&file.name(), &file.type_(), bytes) {
                    Ok(upload) => {
                        set_selected.set(Some((upload.name.clone(), upload.size_label())));
                        p.view.show_toast("文件已就绪", "success");
                    }
                    Err(e) => p.view.show_toast(e.to_string(), "error"),
                }
            });
        });
    };

    let on_file = move |ev: ev::Event| {
        let input = event_target::<web_sys::HtmlInputElement>(&ev);
        let Some(file) = input.files().and_then(|files| files.get(0)) else {
            return;
        };
        input.set_value("");
        load_file(file);
    };

    let on_dragover = move |ev: ev::DragEvent| {
        ev.prevent_default();
        set_dragging.set(true);
    };
    let on_dragleave = move |_: ev::DragEvent| set_dragging.set(false);
    let on_drop = move |ev: ev::DragEvent| {
        ev.prevent_default();
        set_dragging.set(false);
        if let Some(file) = ev
            .data_transfer()
            .and_then(|transfer| transfer.files())
            .and_then(|files| files.get(0))
        {
            load_file(file);
        }
    };

    let on_remove = move |_| {
        page.with_value(|p| {
            if let Ok(mut session) = p.session.try_borrow_mut() {
                session.remove_file();
                set_selected.set(None);
            }
        });
    };

    let on_start = move |_| {
        let page = page.get_value();
        // The request runs on a copy, so the session is never borrowed
        // across an await.
        let upload = page.session.try_borrow().ok().and_then(|s| s.upload().cloned());
        let Some(upload) = upload else {
            page.view.show_toast("请上传 PDF 文件", "error");
            set_stage.set(Stage::Upload);
            return;
        };
        spawn_local(async move {
            set_stage.set(Stage::Progress);
            set_progress.set(RECEIVED);
            sleep(Duration::from_millis(300)).await;
            set_progress.set(READING);

            let outcome = match page.api.summarize_book(&upload).await {
                Ok(generated) => match page.session.try_borrow_mut() {
                    Ok(mut session) => {
                        let document = session.accept(generated);
                        Ok((document.to_html(), document.duration.clone()))
                    }
                    Err(_) => Err("页面正忙，请重试".to_string()),
                },
                Err(e) => {
                    log::error!("Generation failed: {}", e);
                    Err(e.to_string())
                }
            };

            match outcome {
                Ok((html, label)) => {
                    set_progress.set(COMPOSING);
                    sleep(Duration::from_millis(300)).await;
                    set_progress.set(READY);
                    sleep(Duration::from_millis(500)).await;
                    set_script_html.set(html);
                    set_duration.set(label);
                    set_stage.set(Stage::Result);
                }
                Err(message) => {
                    page.view.show_toast(message, "error");
                    set_stage.set(Stage::Upload);
                }
            }
        });
    };

    let on_script_click = move |ev: ev::MouseEvent| {
        let Some(index) = ev
            .target()
            .and_then(|t| t.dyn_into::<web_sys::Element>().ok())
            .and_then(|el| el.closest("[data-segment]").ok().flatten())
            .and_then(|el| el.get_attribute("data-segment"))
            .and_then(|v| v.parse::<usize>().ok())
        else {
            return;
        };
        let c = page.with_value(|p| p.controller.clone());
        spawn_local(async move {
            c.play_segment(index).await;
        });
    };

    let controller = move || page.with_value(|p| p.controller.clone());
    let on_toggle = move |_| {
        let c = controller();
        spawn_local(async move {
            c.toggle_play_pause().await;
        });
    };
    let on_prev = move |_| {
        let c = controller();
        spawn_local(async move {
            c.play_previous().await;
        });
    };
    let on_next = move |_| {
        let c = controller();
        spawn_local(async move {
            c.play_next().await;
        });
    };
    let on_stop = move |_| controller().stop();

    let on_new_book = move |_| {
        page.with_value(|p| {
            if let Ok(mut session) = p.session.try_borrow_mut() {
                session.start_new_book();
            }
        });
        set_selected.set(None);
        set_script_html.set(String::new());
        set_duration.set(None);
        set_stage.set(Stage::Upload);
    };

    view! {
        <section class="upload-section" style:display=move || if stage.get() == Stage::Upload { "block" } else { "none" }>
            <label
                class="upload-zone"
                class:dragover=move || dragging.get()
                on:dragover=on_dragover
                on:dragleave=on_dragleave
                on:drop=on_drop
            >
                <input type="file" accept="application/pdf" on:change=on_file/>
                <div class="upload-icon">"📚"</div>
                <p>"点击选择或拖入 PDF 文件"</p>
            </label>
            {move || selected.get().map(|(name, size)| view! {
                <div class="pdf-preview">
                    <span class="file-name">{name}</span>
                    <span class="file-size">{size}</span>
                    <button class="remove-file" on:click=on_remove>"✕"</button>
                </div>
            })}
            <button class="start-btn" prop:disabled=move || selected.get().is_none() on:click=on_start>
                "🌙 开始讲故事"
            </button>
        </section>

        <section class="progress-section" style:display=move || if stage.get() == Stage::Progress { "flex" } else { "none" }>
            <h2 class="progress-title">{move || progress.get().title}</h2>
            <p class="progress-desc">{move || progress.get().detail}</p>
            <div class="progress-bar">
                <div class="progress-fill" style:width=move || format!("{}%", progress.get().percent)></div>
            </div>
        </section>

        <section class="result-section" style:display=move || if stage.get() == Stage::Result { "block" } else { "none" }>
            <div class="player">
                <div class="now-playing">{move || now_playing.get()}</div>
                <div class="duration">{move || duration.get().unwrap_or_default()}</div>
                <div class="player-controls">
                    <button class="prev-btn" on:click=on_prev>"⏮"</button>
                    <button class="play-pause-btn" on:click=on_toggle>
                        {move || if playing.get() { "⏸" } else { "▶" }}
                    </button>
                    <button class="next-btn" on:click=on_next>"⏭"</button>
                    <button class="stop-btn" on:click=on_stop>"⏹"</button>
                </div>
            </div>
            <div id="scriptContent" class="script-content" on:click=on_script_click inner_html=move || script_html.get()></div>
            <button class="new-book-btn" on:click=on_new_book>"📚 换一本书"</button>
        </section>
    }
}
