use crate::core::config::OpenAIConfig;
use crate::core::error::AppError;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A file attached to a chat message as a data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    pub filename: String,
    pub data_url: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub instruction: String,
    pub document: Option<DocumentInput>,
    /// Ask the model for a single JSON object.
    pub json_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: Option<String>,
    pub total_tokens: Option<u64>,
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AppError>;
    fn model(&self) -> &str;
}

pub fn create_llm(config: &OpenAIConfig) -> Box<dyn LlmClient> {
    Box::new(OpenAIClient::new(config))
}

// --- OpenAI ---

#[derive(Debug)]
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    max_completion_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(config: &OpenAIConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_completion_tokens: config.max_completion_tokens,
            temperature: config.temperature,
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> OpenAIRequest {
        let mut parts = Vec::new();
        if let Some(doc) = &request.document {
            parts.push(ContentPart::File {
                file: FilePart {
                    filename: doc.filename.clone(),
                    file_data: doc.data_url.clone(),
                },
            });
        }
        parts.push(ContentPart::Text {
            text: request.instruction.clone(),
        });

        OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: MessageContent::Text(request.system.clone()),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: MessageContent::Parts(parts),
                },
            ],
            response_format: request.json_output.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
            max_completion_tokens: self.max_completion_tokens,
            temperature: self.temperature,
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    max_completion_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentPart {
    Text { text: String },
    File { file: FilePart },
}

#[derive(Serialize)]
struct FilePart {
    filename: String,
    file_data: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIError,
}

#[derive(Deserialize)]
struct OpenAIError {
    message: String,
}

/// Maps a non-success upstream response to the error shown to the user.
pub(crate) fn api_error(status: u16, body: &str) -> AppError {
    if status == 429 {
        return AppError::RateLimited("OpenAI API 请求过于频繁，请稍后再试".to_string());
    }
    match serde_json::from_str::<OpenAIErrorEnvelope>(body) {
        Ok(envelope) => AppError::Upstream(envelope.error.message),
        Err(_) => AppError::Upstream(format!("OpenAI API error ({}): {}", status, body)),
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("OpenAI 请求失败: {}", e)))?;

        let status = resp.status();
        let response_text = resp
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("OpenAI 响应读取失败: {}", e)))?;

        if !status.is_success() {
            warn!("OpenAI chat completion failed with {}", status);
            return Err(api_error(status.as_u16(), &response_text));
        }

        let result: OpenAIResponse = serde_json::from_str(&response_text).map_err(|e| {
            AppError::Upstream(format!("Failed to parse OpenAI response: {}", e))
        })?;
        let total_tokens = result.usage.and_then(|u| u.total_tokens);
        debug!("OpenAI usage: {:?} tokens", total_tokens);

        Ok(Completion {
            content: result.choices.into_iter().next().and_then(|c| c.message.content),
            total_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAIClient {
        OpenAIClient::new(&OpenAIConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_request_body_shape() {
        let request = CompletionRequest {
            system: "sys".to_string(),
            instruction: "read it".to_string(),
            document: Some(DocumentInput {
                filename: "book.pdf".to_string(),
                data_url: "data:application/pdf;base64,AAAA".to_string(),
            }),
            json_output: true,
        };

        let body = serde_json::to_value(client().build_body(&request)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_completion_tokens"], 8000);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "sys");

        let parts = &body["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "file");
        assert_eq!(parts[0]["file"]["filename"], "book.pdf");
        assert_eq!(parts[0]["file"]["file_data"], "data:application/pdf;base64,AAAA");
        assert_eq!(parts[1]["type"], "text");
        assert_eq!(parts[1]["text"], "read it");
    }

    #[test]
    fn test_plain_request_omits_response_format() {
        let request = CompletionRequest {
            system: "sys".to_string(),
            instruction: "hi".to_string(),
            document: None,
            json_output: false,
        };
        let body = serde_json::to_value(client().build_body(&request)).unwrap();
        assert!(body.get("response_format").is_none());
        assert_eq!(body["messages"][1]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "{\"title\": \"T\"}"
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 9,
                "completion_tokens": 12,
                "total_tokens": 21
            }
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.choices[0].message.content.as_deref(), Some("{\"title\": \"T\"}"));
        assert_eq!(result.usage.unwrap().total_tokens, Some(21));
    }

    #[test]
    fn test_openai_response_parsing_null_content() {
        let json = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert!(result.choices[0].message.content.is_none());
        assert!(result.usage.is_none());
    }

    #[test]
    fn test_api_error_mapping() {
        assert!(matches!(api_error(429, ""), AppError::RateLimited(_)));
        assert_eq!(
            api_error(400, r#"{"error": {"message": "Invalid file", "type": "invalid_request_error"}}"#),
            AppError::Upstream("Invalid file".to_string())
        );
        assert_eq!(
            api_error(502, "Bad Gateway"),
            AppError::Upstream("OpenAI API error (502): Bad Gateway".to_string())
        );
    }
}
