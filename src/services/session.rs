use crate::core::api::{GeneratedScript, GenerationMeta};
use crate::core::error::AppError;
use crate::core::script::Script;
use crate::services::api_client::BookApi;
use crate::services::playback::PlaybackController;
use crate::services::renderer::{render, DisplayDocument};
use crate::utils::format::format_file_size;
use log::info;

pub const PDF_MIME: &str = "application/pdf";

/// A file the listener picked, checked against the upload rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfUpload {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PdfUpload {
    pub fn new(
        name: impl Into<String>,
        content_type: &str,
        bytes: Vec<u8>,
        max_size: u64,
    ) -> Result<Self, AppError> {
        if content_type != PDF_MIME {
            return Err(AppError::Validation("请上传 PDF 文件".to_string()));
        }
        if bytes.len() as u64 > max_size {
            return Err(AppError::Validation(format!(
                "文件过大，最大支持 {}",
                format_file_size(max_size)
            )));
        }
        Ok(Self {
            name: name.into(),
            content_type: content_type.to_string(),
            bytes,
        })
    }

    pub fn size_label(&self) -> String {
        format_file_size(self.bytes.len() as u64)
    }
}

/// Everything one page visit holds: the chosen file, the current script and
/// the controller playing it.
pub struct Session {
    max_file_size: u64,
    upload: Option<PdfUpload>,
    script: Option<Script>,
    meta: Option<GenerationMeta>,
    document: Option<DisplayDocument>,
    controller: PlaybackController,
}

impl Session {
    pub fn new(controller: PlaybackController, max_file_size: u64) -> Self {
        Self {
            max_file_size,
            upload: None,
            script: None,
            meta: None,
            document: None,
            controller,
        }
    }

    /// Validates and keeps the file. A rejected file leaves the previous
    /// selection in place.
    pub fn select_file(&mut self, name: &str, content_type: &str, bytes: Vec<u8>) -> Result<&PdfUpload, AppError> {
        let upload = PdfUpload::new(name, content_type, bytes, self.max_file_size)?;
        info!("Selected {} ({})", upload.name, upload.size_label());
        Ok(&*self.upload.insert(upload))
    }

    pub fn remove_file(&mut self) {
        self.upload = None;
    }

    pub fn upload(&self) -> Option<&PdfUpload> {
        self.upload.as_ref()
    }

    /// Sends the selected file for generation and shows the result. On
    /// failure nothing changes, so the listener can retry with the same file.
    pub async fn generate(&mut self, api: &dyn BookApi) -> Result<&DisplayDocument, AppError> {
        let upload = self
            .upload
            .as_ref()
            .ok_or_else(|| AppError::Validation("请上传 PDF 文件".to_string()))?;
        let generated = api.summarize_book(upload).await?;
        Ok(self.accept(generated))
    }

    /// Shows a script generated for the selected file. Lets the caller run
    /// the upload without holding on to the session.
    pub fn accept(&mut self, generated: GeneratedScript) -> &DisplayDocument {
        self.meta = Some(generated.meta);
        self.load_script(generated.script)
    }

    /// Renders a script and hands its segments to the controller.
    pub fn load_script(&mut self, script: Script) -> &DisplayDocument {
        let rendered = render(&script);
        self.controller.load(rendered.segments);
        self.script = Some(script);
        self.document.insert(rendered.document)
    }

    /// Back to the upload view with nothing playing and nothing cached.
    pub fn start_new_book(&mut self) {
        self.controller.reset();
        self.upload = None;
        self.script = None;
        self.meta = None;
        self.document = None;
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn meta(&self) -> Option<&GenerationMeta> {
        self.meta.as_ref()
    }

    pub fn document(&self) -> Option<&DisplayDocument> {
        self.document.as_ref()
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::StorySection;
    use crate::core::state::PlaybackStatus;
    use crate::services::playback::{Notice, PlaybackView};
    use crate::services::tts::testing::{EchoApi, RecordingSink};
    use crate::services::tts::RemoteSpeech;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    const MAX: u64 = 1024;

    struct NullView;

    impl PlaybackView for NullView {
        fn set_now_playing(&self, _label: &str) {}
        fn set_playing(&self, _playing: bool) {}
        fn highlight(&self, _index: usize) {}
        fn clear_highlight(&self) {}
        fn notify(&self, _notice: Notice) {}
    }

    struct FakeBookApi {
        result: Result<GeneratedScript, AppError>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl BookApi for FakeBookApi {
        async fn summarize_book(&self, _upload: &PdfUpload) -> Result<GeneratedScript, AppError> {
            *self.calls.lock() += 1;
            self.result.clone()
        }
    }

    fn script() -> Script {
        Script {
            title: "T".to_string(),
            hook: Some("H".to_string()),
            story: vec![StorySection {
                section: "S1".to_string(),
                content: "C1".to_string(),
            }],
            key_takeaways: vec!["K1".to_string()],
            ..Default::default()
        }
    }

    fn generated() -> GeneratedScript {
        GeneratedScript {
            script: script(),
            meta: GenerationMeta {
                model: "gpt-4o".to_string(),
                filename: "book.pdf".to_string(),
                file_size: 3,
                tokens_used: None,
            },
        }
    }

    fn session() -> Session {
        let backend = Arc::new(RemoteSpeech::new(
            Arc::new(EchoApi::default()),
            Arc::new(RecordingSink::default()),
        ));
        let controller = PlaybackController::new(backend, Arc::new(NullView), Duration::from_secs(1));
        Session::new(controller, MAX)
    }

    fn api(result: Result<GeneratedScript, AppError>) -> FakeBookApi {
        FakeBookApi {
            result,
            calls: Mutex::new(0),
        }
    }

    #[test]
    fn test_select_rejects_wrong_type_and_keeps_previous() {
        let mut session = session();
        session.select_file("a.pdf", PDF_MIME, vec![0; 10]).unwrap();

        let err = session.select_file("a.txt", "text/plain", vec![0; 10]).unwrap_err();
        assert_eq!(err, AppError::Validation("请上传 PDF 文件".to_string()));
        assert_eq!(session.upload().unwrap().name, "a.pdf");
    }

    #[test]
    fn test_select_rejects_oversized_file() {
        let mut session = session();
        let err = session
            .select_file("big.pdf", PDF_MIME, vec![0; MAX as usize + 1])
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m.starts_with("文件过大")));
        assert!(session.upload().is_none());

        assert!(session.select_file("ok.pdf", PDF_MIME, vec![0; MAX as usize]).is_ok());
        session.remove_file();
        assert!(session.upload().is_none());
    }

    #[tokio::test]
    async fn test_generate_without_file_skips_the_call() {
        let mut session = session();
        let api = api(Err(AppError::Upstream("unused".into())));
        assert!(matches!(session.generate(&api).await, Err(AppError::Validation(_))));
        assert_eq!(*api.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_generate_renders_and_loads_segments() {
        let mut session = session();
        session.select_file("book.pdf", PDF_MIME, vec![1, 2, 3]).unwrap();
        let api = api(Ok(generated()));

        let document = session.generate(&api).await.unwrap();
        assert_eq!(document.title, "T");
        assert_eq!(document.segment_ids(), vec![0, 1, 2]);
        assert_eq!(session.controller().segment_count(), 3);
        assert_eq!(session.meta().unwrap().model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_upload_from_a_copy_then_accept() {
        let mut session = session();
        session.select_file("book.pdf", PDF_MIME, vec![1, 2, 3]).unwrap();
        let upload = session.upload().cloned().unwrap();
        let api = api(Ok(generated()));

        // Selection is still possible while the request is in flight.
        let fetched = api.summarize_book(&upload).await.unwrap();
        session.remove_file();
        session.select_file("book.pdf", PDF_MIME, vec![1, 2, 3]).unwrap();

        let document = session.accept(fetched);
        assert_eq!(document.segment_ids(), vec![0, 1, 2]);
        assert_eq!(session.controller().segment_count(), 3);
        assert_eq!(session.meta().unwrap().filename, "book.pdf");
        assert_eq!(*api.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_file_and_previous_state() {
        let mut session = session();
        session.select_file("book.pdf", PDF_MIME, vec![1]).unwrap();
        let api = api(Err(AppError::RateLimited("请求过于频繁，请稍后再试".into())));

        assert!(matches!(session.generate(&api).await, Err(AppError::RateLimited(_))));
        assert!(session.upload().is_some());
        assert!(session.document().is_none());
        assert_eq!(session.controller().segment_count(), 0);
    }

    #[test]
    fn test_start_new_book_clears_everything() {
        let mut session = session();
        session.select_file("book.pdf", PDF_MIME, vec![1]).unwrap();
        session.load_script(script());
        assert!(session.script().is_some());

        session.start_new_book();
        assert!(session.upload().is_none());
        assert!(session.script().is_none());
        assert!(session.document().is_none());
        assert_eq!(session.controller().segment_count(), 0);
        assert_eq!(session.controller().status(), PlaybackStatus::Idle);
    }
}
