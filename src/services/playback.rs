use crate::core::error::AppError;
use crate::core::state::{PlaybackState, PlaybackStatus};
use crate::services::renderer::{Segment, IDLE_LABEL};
use crate::services::tts::SpeechBackend;
use crate::utils::time::sleep;
use futures_util::future::{AbortHandle, Abortable};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[cfg(target_arch = "wasm32")]
pub trait ViewBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> ViewBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait ViewBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> ViewBounds for T {}

/// Messages surfaced to the listener as a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error(String),
    /// The listener asked for the next segment after the last one.
    Finished,
}

/// Whatever shows playback progress to the listener.
pub trait PlaybackView: ViewBounds {
    fn set_now_playing(&self, label: &str);
    fn set_playing(&self, playing: bool);
    /// Marks block `index` as the one being read and scrolls it into view.
    fn highlight(&self, index: usize);
    fn clear_highlight(&self);
    fn notify(&self, notice: Notice);
}

/// Shown before a segment's audio has to be fetched.
pub const FETCHING_NOTICE: &str = "正在生成高质量音频...";

/// How a playback run came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Auto-advance ran past the last segment.
    Finished,
    Paused,
    Stopped,
    /// Another operation started a newer run.
    Superseded,
    Failed,
}

enum Start {
    Run(u64, Segment),
    OutOfRange,
    /// The run asking to advance has been superseded.
    Stale,
}

struct Inner {
    state: PlaybackState,
    segments: Arc<[Segment]>,
    abort: Option<AbortHandle>,
}

impl Inner {
    fn cancel_run(&mut self) {
        if let Some(handle) = self.abort.take() {
            handle.abort();
        }
    }
}

/// Plays segments one after another through a [`SpeechBackend`].
///
/// Every operation that starts, pauses or stops playback bumps the run
/// generation and aborts the stage the previous run is suspended in, so at
/// most one segment is ever audible. Clones share the same state.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Mutex<Inner>>,
    backend: Arc<dyn SpeechBackend>,
    view: Arc<dyn PlaybackView>,
    pacing: Duration,
}

impl PlaybackController {
    pub fn new(backend: Arc<dyn SpeechBackend>, view: Arc<dyn PlaybackView>, pacing: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: PlaybackState::default(),
                segments: Arc::from(Vec::new()),
                abort: None,
            })),
            backend,
            view,
            pacing,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.inner.lock().state.status()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.lock().state.current
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().state.is_playing
    }

    pub fn segment_count(&self) -> usize {
        self.inner.lock().segments.len()
    }

    /// Replaces the segment sequence. Playback is stopped first so the
    /// current index never points into the old sequence.
    pub fn load(&self, segments: Vec<Segment>) {
        self.stop();
        let count = segments.len();
        self.inner.lock().segments = Arc::from(segments);
        debug!("Loaded {} segments", count);
    }

    /// Stops playback, forgets the segments and clears backend caches.
    pub fn reset(&self) {
        self.stop();
        self.inner.lock().segments = Arc::from(Vec::new());
        self.backend.reset();
    }

    /// Plays segment `index`, then keeps advancing until the end of the
    /// sequence or until another operation takes over.
    pub async fn play_segment(&self, index: usize) -> PlaybackOutcome {
        let mut index = index;
        let mut previous = None;
        loop {
            let (generation, segment) = match self.begin(index, previous) {
                Start::Run(generation, segment) => (generation, segment),
                Start::Stale => return self.interrupted(),
                Start::OutOfRange => match previous {
                    None => {
                        self.stop();
                        return PlaybackOutcome::Stopped;
                    }
                    Some(generation) => {
                        if !self.end_run(Some(generation)) {
                            return self.interrupted();
                        }
                        info!("Reached the end of the script");
                        return PlaybackOutcome::Finished;
                    }
                },
            };
            previous = Some(generation);

            if self.backend.will_fetch(&segment.text) {
                self.view.notify(Notice::Info(FETCHING_NOTICE.to_string()));
            }
            // Synthesis runs to completion even when the run is superseded,
            // so a fetched clip still lands in the backend cache.
            let handle = match self.settle_stage(generation, self.backend.synthesize(&segment.text)).await {
                None => return self.interrupted(),
                Some(Err(e)) => return self.fail(generation, e),
                Some(Ok(handle)) => handle,
            };

            match self.run_stage(generation, self.backend.play(&handle)).await {
                None => return self.interrupted(),
                Some(Err(e)) => return self.fail(generation, e),
                Some(Ok(())) => {}
            }

            if self.run_stage(generation, sleep(self.pacing)).await.is_none() {
                return self.interrupted();
            }

            index += 1;
        }
    }

    /// Pauses while playing; otherwise resumes at the current segment, or
    /// starts from the first one.
    pub async fn toggle_play_pause(&self) -> PlaybackOutcome {
        let (playing, current) = {
            let inner = self.inner.lock();
            (inner.state.is_playing, inner.state.current)
        };

        if playing {
            self.pause();
            PlaybackOutcome::Paused
        } else {
            self.play_segment(current.unwrap_or(0)).await
        }
    }

    /// Halts output and keeps the current index for resume.
    pub fn pause(&self) {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_playing {
                return;
            }
            inner.state.pause();
            inner.cancel_run();
        }
        self.backend.halt();
        self.view.set_playing(false);
    }

    pub async fn play_previous(&self) -> PlaybackOutcome {
        let previous = self.current_index().map_or(0, |i| i.saturating_sub(1));
        self.play_segment(previous).await
    }

    pub async fn play_next(&self) -> PlaybackOutcome {
        let next = self.current_index().map_or(0, |i| i + 1);
        if next < self.segment_count() {
            self.play_segment(next).await
        } else {
            self.stop();
            self.view.notify(Notice::Finished);
            PlaybackOutcome::Finished
        }
    }

    pub fn stop(&self) {
        self.end_run(None);
    }

    /// Moves to `Idle`. With `Some(generation)` this only happens while that
    /// run is still the active one; returns whether anything was stopped.
    fn end_run(&self, generation: Option<u64>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state.status() == PlaybackStatus::Idle {
                return false;
            }
            if generation.is_some_and(|g| !inner.state.is_active(g)) {
                return false;
            }
            inner.state.reset();
            inner.cancel_run();
        }
        self.backend.halt();
        self.view.set_playing(false);
        self.view.clear_highlight();
        self.view.set_now_playing(IDLE_LABEL);
        true
    }

    /// Starts run for `index`. `previous` is the run advancing into it, if
    /// any; a superseded one must not start anything.
    fn begin(&self, index: usize, previous: Option<u64>) -> Start {
        let (generation, segment) = {
            let mut inner = self.inner.lock();
            if previous.is_some_and(|g| !inner.state.is_active(g)) {
                return Start::Stale;
            }
            let Some(segment) = inner.segments.get(index).cloned() else {
                return Start::OutOfRange;
            };
            inner.cancel_run();
            (inner.state.start(index), segment)
        };

        self.backend.halt();
        self.view.set_playing(true);
        self.view.set_now_playing(&segment.label());
        self.view.highlight(index);
        debug!("Playing segment {} (run {})", index, generation);
        Start::Run(generation, segment)
    }

    /// Runs one abortable suspension point of run `generation`. Yields `None`
    /// when the run was superseded before, during or right after the stage.
    async fn run_stage<F: Future>(&self, generation: u64, stage: F) -> Option<F::Output> {
        let (handle, registration) = AbortHandle::new_pair();
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_active(generation) {
                return None;
            }
            inner.abort = Some(handle);
        }

        let output = Abortable::new(stage, registration).await.ok()?;
        self.inner.lock().state.is_active(generation).then_some(output)
    }

    /// Like [`Self::run_stage`], but the stage is never cut short. Its output
    /// is dropped if the run was superseded meanwhile.
    async fn settle_stage<F: Future>(&self, generation: u64, stage: F) -> Option<F::Output> {
        if !self.inner.lock().state.is_active(generation) {
            return None;
        }
        let output = stage.await;
        self.inner.lock().state.is_active(generation).then_some(output)
    }

    fn interrupted(&self) -> PlaybackOutcome {
        match self.status() {
            PlaybackStatus::Idle => PlaybackOutcome::Stopped,
            PlaybackStatus::Paused(_) => PlaybackOutcome::Paused,
            PlaybackStatus::Playing(_) => PlaybackOutcome::Superseded,
        }
    }

    fn fail(&self, generation: u64, err: AppError) -> PlaybackOutcome {
        if !self.inner.lock().state.is_active(generation) {
            return self.interrupted();
        }
        error!("Playback failed on {} backend: {}", self.backend.name(), err);
        self.view.notify(Notice::Error(format!("播放失败: {}", err)));
        if !self.end_run(Some(generation)) {
            return self.interrupted();
        }
        PlaybackOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::AudioClip;
    use crate::services::renderer::SegmentKind;
    use crate::services::tts::testing::RecordingSink;
    use crate::services::tts::{AudioHandle, RemoteSpeech, SpeechApi, Utterance};
    use async_trait::async_trait;

    const SPEAK_TIME: Duration = Duration::from_secs(3);

    #[derive(Default)]
    struct FakeBackend {
        started: Mutex<Vec<String>>,
        completed: Mutex<Vec<String>>,
        halts: Mutex<usize>,
        resets: Mutex<usize>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl SpeechBackend for FakeBackend {
        async fn synthesize(&self, text: &str) -> Result<AudioHandle, AppError> {
            if self.fail_on.as_deref() == Some(text) {
                return Err(AppError::Upstream("boom".to_string()));
            }
            Ok(AudioHandle::Utterance(Utterance {
                text: text.to_string(),
                lang: "zh-CN".to_string(),
                rate: 1.0,
                pitch: 1.0,
                volume: 1.0,
                voice: None,
            }))
        }

        async fn play(&self, handle: &AudioHandle) -> Result<(), AppError> {
            let AudioHandle::Utterance(utterance) = handle else {
                return Err(AppError::Playback("clip".to_string()));
            };
            self.started.lock().push(utterance.text.clone());
            tokio::time::sleep(SPEAK_TIME).await;
            self.completed.lock().push(utterance.text.clone());
            Ok(())
        }

        fn halt(&self) {
            *self.halts.lock() += 1;
        }

        fn reset(&self) {
            *self.resets.lock() += 1;
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum ViewEvent {
        NowPlaying(String),
        Playing(bool),
        Highlight(usize),
        ClearHighlight,
        Notice(Notice),
    }

    #[derive(Default)]
    struct RecordingView {
        events: Mutex<Vec<ViewEvent>>,
    }

    impl RecordingView {
        fn notices(&self) -> Vec<Notice> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| match e {
                    ViewEvent::Notice(n) => Some(n.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl PlaybackView for RecordingView {
        fn set_now_playing(&self, label: &str) {
            self.events.lock().push(ViewEvent::NowPlaying(label.to_string()));
        }
        fn set_playing(&self, playing: bool) {
            self.events.lock().push(ViewEvent::Playing(playing));
        }
        fn highlight(&self, index: usize) {
            self.events.lock().push(ViewEvent::Highlight(index));
        }
        fn clear_highlight(&self) {
            self.events.lock().push(ViewEvent::ClearHighlight);
        }
        fn notify(&self, notice: Notice) {
            self.events.lock().push(ViewEvent::Notice(notice));
        }
    }

    fn segments(texts: &[&str]) -> Vec<Segment> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| Segment {
                index,
                kind: SegmentKind::Takeaway,
                title: None,
                text: text.to_string(),
            })
            .collect()
    }

    fn controller_with(
        backend: FakeBackend,
        texts: &[&str],
    ) -> (PlaybackController, Arc<FakeBackend>, Arc<RecordingView>) {
        let backend = Arc::new(backend);
        let view = Arc::new(RecordingView::default());
        let controller = PlaybackController::new(backend.clone(), view.clone(), Duration::from_secs(1));
        controller.load(segments(texts));
        (controller, backend, view)
    }

    fn controller(texts: &[&str]) -> (PlaybackController, Arc<FakeBackend>, Arc<RecordingView>) {
        controller_with(FakeBackend::default(), texts)
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_every_segment_in_order() {
        let (controller, backend, view) = controller(&["a", "b", "c"]);

        assert_eq!(controller.play_segment(0).await, PlaybackOutcome::Finished);
        assert_eq!(*backend.completed.lock(), vec!["a", "b", "c"]);
        assert_eq!(controller.status(), PlaybackStatus::Idle);

        {
            let events = view.events.lock();
            assert_eq!(events.last(), Some(&ViewEvent::NowPlaying(IDLE_LABEL.to_string())));
            let highlights: Vec<_> = events
                .iter()
                .filter_map(|e| match e {
                    ViewEvent::Highlight(i) => Some(*i),
                    _ => None,
                })
                .collect();
            assert_eq!(highlights, vec![0, 1, 2]);
        }
        assert!(view.notices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_index_stays_idle() {
        let (controller, backend, view) = controller(&["a", "b"]);

        assert_eq!(controller.play_segment(2).await, PlaybackOutcome::Stopped);
        assert_eq!(controller.play_segment(usize::MAX).await, PlaybackOutcome::Stopped);
        assert_eq!(controller.status(), PlaybackStatus::Idle);
        assert!(backend.started.lock().is_empty());
        assert!(view.events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_pauses_and_resumes_same_segment() {
        let (controller, backend, _) = controller(&["a", "b"]);

        let c = controller.clone();
        let run = tokio::spawn(async move { c.play_segment(0).await });
        settle(500).await;
        assert_eq!(controller.status(), PlaybackStatus::Playing(0));

        let halts_before = *backend.halts.lock();
        assert_eq!(controller.toggle_play_pause().await, PlaybackOutcome::Paused);
        assert_eq!(run.await.unwrap(), PlaybackOutcome::Paused);
        assert_eq!(controller.status(), PlaybackStatus::Paused(0));
        assert!(*backend.halts.lock() > halts_before);
        assert!(backend.completed.lock().is_empty());

        settle(10_000).await;
        assert_eq!(controller.status(), PlaybackStatus::Paused(0));

        assert_eq!(controller.toggle_play_pause().await, PlaybackOutcome::Finished);
        assert_eq!(*backend.started.lock(), vec!["a", "a", "b"]);
        assert_eq!(*backend.completed.lock(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_from_idle_starts_at_first_segment() {
        let (controller, backend, _) = controller(&["a"]);
        assert_eq!(controller.toggle_play_pause().await, PlaybackOutcome::Finished);
        assert_eq!(*backend.completed.lock(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_pacing_suppresses_advance() {
        let (controller, backend, _) = controller(&["a", "b"]);

        let c = controller.clone();
        let run = tokio::spawn(async move { c.play_segment(0).await });
        settle(3_500).await;
        assert_eq!(*backend.completed.lock(), vec!["a"]);

        controller.stop();
        assert_eq!(run.await.unwrap(), PlaybackOutcome::Stopped);

        settle(10_000).await;
        assert_eq!(*backend.started.lock(), vec!["a"]);
        assert_eq!(controller.status(), PlaybackStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_at_first_segment_replays_it() {
        let (controller, backend, _) = controller(&["a", "b"]);

        let c = controller.clone();
        let first = tokio::spawn(async move { c.play_segment(0).await });
        settle(100).await;

        let c = controller.clone();
        let second = tokio::spawn(async move { c.play_previous().await });
        settle(100).await;

        assert_eq!(first.await.unwrap(), PlaybackOutcome::Superseded);
        assert_eq!(controller.status(), PlaybackStatus::Playing(0));
        assert_eq!(*backend.started.lock(), vec!["a", "a"]);

        controller.stop();
        assert_eq!(second.await.unwrap(), PlaybackOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_after_last_segment_finishes() {
        let (controller, _, view) = controller(&["a", "b"]);

        let c = controller.clone();
        let run = tokio::spawn(async move { c.play_segment(1).await });
        settle(100).await;

        assert_eq!(controller.play_next().await, PlaybackOutcome::Finished);
        assert_eq!(run.await.unwrap(), PlaybackOutcome::Stopped);
        assert_eq!(controller.status(), PlaybackStatus::Idle);
        assert_eq!(view.notices(), vec![Notice::Finished]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_a_no_op() {
        let (controller, backend, view) = controller(&["a"]);
        controller.stop();
        controller.stop();
        assert_eq!(controller.status(), PlaybackStatus::Idle);
        assert_eq!(*backend.halts.lock(), 0);
        assert!(view.events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_surfaces_error_and_goes_idle() {
        let backend = FakeBackend {
            fail_on: Some("b".to_string()),
            ..Default::default()
        };
        let (controller, backend, view) = controller_with(backend, &["a", "b", "c"]);

        assert_eq!(controller.play_segment(0).await, PlaybackOutcome::Failed);
        assert_eq!(controller.status(), PlaybackStatus::Idle);
        assert_eq!(*backend.completed.lock(), vec!["a"]);
        assert_eq!(view.notices(), vec![Notice::Error("播放失败: boom".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_run_supersedes_old_one() {
        let (controller, backend, _) = controller(&["a", "b", "c"]);

        let c = controller.clone();
        let first = tokio::spawn(async move { c.play_segment(0).await });
        settle(1_000).await;

        let c = controller.clone();
        let second = tokio::spawn(async move { c.play_segment(2).await });

        assert_eq!(first.await.unwrap(), PlaybackOutcome::Superseded);
        assert_eq!(second.await.unwrap(), PlaybackOutcome::Finished);
        assert_eq!(*backend.started.lock(), vec!["a", "c"]);
        assert_eq!(*backend.completed.lock(), vec!["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_and_reset_stop_playback() {
        let (controller, backend, _) = controller(&["a", "b"]);

        let c = controller.clone();
        let run = tokio::spawn(async move { c.play_segment(1).await });
        settle(100).await;

        controller.load(segments(&["x"]));
        assert_eq!(run.await.unwrap(), PlaybackOutcome::Stopped);
        assert_eq!(controller.status(), PlaybackStatus::Idle);
        assert_eq!(controller.segment_count(), 1);

        controller.reset();
        assert_eq!(controller.segment_count(), 0);
        assert_eq!(*backend.resets.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_pacing_suppresses_advance() {
        let (controller, backend, _) = controller(&["a", "b"]);

        let c = controller.clone();
        let run = tokio::spawn(async move { c.play_segment(0).await });
        settle(3_500).await;
        assert_eq!(*backend.completed.lock(), vec!["a"]);

        controller.pause();
        assert_eq!(run.await.unwrap(), PlaybackOutcome::Paused);

        settle(10_000).await;
        assert_eq!(controller.status(), PlaybackStatus::Paused(0));
        assert_eq!(*backend.started.lock(), vec!["a"]);
    }

    #[test]
    fn test_stale_run_cannot_advance_or_end_a_newer_one() {
        let (controller, backend, view) = controller(&["a", "b"]);

        let Start::Run(old, _) = controller.begin(0, None) else {
            panic!("segment 0 should start");
        };
        controller.stop();
        assert!(matches!(controller.begin(1, Some(old)), Start::Stale));
        assert_eq!(controller.status(), PlaybackStatus::Idle);

        let Start::Run(newer, _) = controller.begin(1, None) else {
            panic!("segment 1 should start");
        };
        assert_ne!(old, newer);
        assert!(!controller.end_run(Some(old)));
        assert_eq!(controller.status(), PlaybackStatus::Playing(1));
        assert!(backend.started.lock().is_empty());

        assert!(controller.end_run(Some(newer)));
        assert_eq!(controller.status(), PlaybackStatus::Idle);
        assert_eq!(
            view.events.lock().last(),
            Some(&ViewEvent::NowPlaying(IDLE_LABEL.to_string()))
        );
    }

    /// Speech endpoint that takes two seconds per request.
    #[derive(Default)]
    struct SlowApi {
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechApi for SlowApi {
        async fn synthesize(&self, text: &str) -> Result<AudioClip, AppError> {
            self.requests.lock().push(text.to_string());
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(AudioClip::new(text.as_bytes().to_vec(), "audio/mpeg"))
        }
    }

    fn remote_controller(
        texts: &[&str],
    ) -> (PlaybackController, Arc<SlowApi>, Arc<RecordingSink>, Arc<RecordingView>) {
        let api = Arc::new(SlowApi::default());
        let sink = Arc::new(RecordingSink::default());
        let view = Arc::new(RecordingView::default());
        let backend = Arc::new(RemoteSpeech::new(api.clone(), sink.clone()));
        let controller = PlaybackController::new(backend, view.clone(), Duration::from_secs(1));
        controller.load(segments(texts));
        (controller, api, sink, view)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_fetch_keeps_the_clip() {
        let (controller, api, sink, _) = remote_controller(&["a"]);

        let c = controller.clone();
        let run = tokio::spawn(async move { c.play_segment(0).await });
        settle(500).await;

        controller.pause();
        assert_eq!(run.await.unwrap(), PlaybackOutcome::Paused);
        assert!(sink.played.lock().is_empty());

        settle(5_000).await;
        assert_eq!(controller.toggle_play_pause().await, PlaybackOutcome::Finished);
        assert_eq!(*api.requests.lock(), vec!["a".to_string()]);
        assert_eq!(sink.played.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_notice_only_on_cache_miss() {
        let (controller, api, _, view) = remote_controller(&["a"]);

        assert_eq!(controller.play_segment(0).await, PlaybackOutcome::Finished);
        assert_eq!(controller.play_segment(0).await, PlaybackOutcome::Finished);

        assert_eq!(api.requests.lock().len(), 1);
        assert_eq!(view.notices(), vec![Notice::Info(FETCHING_NOTICE.to_string())]);
    }
}
