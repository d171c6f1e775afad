use crate::core::api::{GeneratedScript, GenerationMeta};
use crate::core::error::AppError;
use crate::core::script::Script;
use crate::services::llm::{CompletionRequest, DocumentInput, LlmClient};
use base64::{engine::general_purpose, Engine as _};
use log::info;
use std::sync::Arc;

pub const STORYTELLER_SYSTEM_PROMPT: &str = r#"你是"爸爸说书"：一位温暖、聪明又有点幽默的父亲，正坐在床边给孩子讲睡前故事。

【你要做的事】
你不是在读书，也不是在写读书笔记。你要把一本书变成一个让孩子听得入迷的故事，道理藏在情节里，听完自然就懂了。

【讲述方式】
1. 语气亲切，像在聊天："来，今天爸爸给你讲个特别有意思的故事……"
2. 多用口语和小悬念："你猜怎么着？""可是，事情没这么简单……"
3. 把概念变成有人物、有场景、有转折的情节，用生活里的例子打比方。
4. 节奏舒缓，重要的地方放慢，用"记住哦"来强调。
5. 复杂的东西用大白话讲清楚，五岁小孩也能听懂。

【不要这样】
- 不要照搬原文，不要学术腔。
- 不要说"本书讲述了""作者认为"。
- 不要干巴巴地罗列要点。

【输出格式】
只输出一个 JSON 对象，不要有任何其他文字：

{
  "title": "故事的名字（不是书名）",
  "hook": "开场白，一两句话，让人想听下去",
  "summary": "一句话说清这个故事讲什么",
  "story": [
    { "section": "这一段的小标题", "content": "故事内容，400 到 600 字" }
  ],
  "key_takeaways": ["记住哦，这个故事告诉我们……"],
  "actionable_steps": ["明天试试看……"],
  "bedtime_wisdom": "睡前的叮嘱和晚安",
  "duration_estimate": "预计收听时长",
  "glossary": [
    { "term": "故事里出现的难词", "explanation": "用孩子听得懂的话解释" }
  ]
}

【篇幅】
- story 3 到 6 段，每段像一个小故事。
- key_takeaways 3 到 5 条，actionable_steps 2 到 4 条，都要口语化。
- bedtime_wisdom 必须有，要温暖。
- glossary 可以为空。"#;

pub const STORYTELLER_INSTRUCTION: &str =
    "请仔细阅读这本书的 PDF，用说书人的风格把它的精华改写成一份引人入胜的说书稿。只输出纯 JSON。";

const DEFAULT_FILENAME: &str = "document.pdf";

/// An uploaded PDF, already validated by the caller.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl PdfDocument {
    pub fn data_url(&self) -> String {
        format!(
            "data:application/pdf;base64,{}",
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Turns a PDF into a storyteller script through the LLM.
#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    llm: Arc<dyn LlmClient>,
}

impl ScriptGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    pub fn build_request(&self, document: &PdfDocument) -> CompletionRequest {
        let filename = if document.filename.trim().is_empty() {
            DEFAULT_FILENAME.to_string()
        } else {
            document.filename.clone()
        };

        CompletionRequest {
            system: STORYTELLER_SYSTEM_PROMPT.to_string(),
            instruction: STORYTELLER_INSTRUCTION.to_string(),
            document: Some(DocumentInput {
                filename,
                data_url: document.data_url(),
            }),
            json_output: true,
        }
    }

    pub async fn generate(&self, document: &PdfDocument) -> Result<GeneratedScript, AppError> {
        info!(
            "Received {} ({} bytes), asking {} for a script",
            document.filename,
            document.bytes.len(),
            self.llm.model()
        );

        let completion = self.llm.complete(&self.build_request(document)).await?;
        let content = completion
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::MalformedOutput("OpenAI 返回内容为空".to_string()))?;

        let script = Script::from_model_output(&content)?;
        info!("Script ready: {} ({} chapters)", script.title, script.story.len());

        Ok(GeneratedScript {
            script,
            meta: GenerationMeta {
                model: self.llm.model().to_string(),
                filename: document.filename.clone(),
                file_size: document.bytes.len() as u64,
                tokens_used: completion.total_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::Completion;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct FakeLlm {
        reply: Option<String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AppError> {
            self.seen.lock().push(request.clone());
            Ok(Completion {
                content: self.reply.clone(),
                total_tokens: Some(1234),
            })
        }

        fn model(&self) -> &str {
            "fake-model"
        }
    }

    fn pdf() -> PdfDocument {
        PdfDocument {
            filename: "book.pdf".to_string(),
            bytes: b"%PDF-1.4".to_vec(),
        }
    }

    #[test]
    fn test_data_url() {
        assert_eq!(pdf().data_url(), "data:application/pdf;base64,JVBERi0xLjQ=");
    }

    #[test]
    fn test_blank_filename_falls_back() {
        let generator = ScriptGenerator::new(Arc::new(FakeLlm::default()));
        let doc = PdfDocument {
            filename: " ".to_string(),
            bytes: vec![1],
        };
        let request = generator.build_request(&doc);
        assert_eq!(request.document.unwrap().filename, "document.pdf");
        assert!(request.json_output);
    }

    #[tokio::test]
    async fn test_generate_parses_fenced_output() {
        let llm = Arc::new(FakeLlm {
            reply: Some("```json\n{\"title\": \"T\", \"hook\": \"H\"}\n```".to_string()),
            ..Default::default()
        });
        let generator = ScriptGenerator::new(llm.clone());

        let generated = generator.generate(&pdf()).await.unwrap();
        assert_eq!(generated.script.title, "T");
        assert_eq!(generated.meta.model, "fake-model");
        assert_eq!(generated.meta.filename, "book.pdf");
        assert_eq!(generated.meta.file_size, 8);
        assert_eq!(generated.meta.tokens_used, Some(1234));

        let seen = llm.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].system, STORYTELLER_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_empty_output_is_malformed() {
        let generator = ScriptGenerator::new(Arc::new(FakeLlm::default()));
        assert_eq!(
            generator.generate(&pdf()).await.unwrap_err(),
            AppError::MalformedOutput("OpenAI 返回内容为空".to_string())
        );
    }

    #[tokio::test]
    async fn test_unparsable_output_is_malformed() {
        let generator = ScriptGenerator::new(Arc::new(FakeLlm {
            reply: Some("once upon a time".to_string()),
            ..Default::default()
        }));
        assert!(matches!(
            generator.generate(&pdf()).await.unwrap_err(),
            AppError::MalformedOutput(_)
        ));
    }
}
