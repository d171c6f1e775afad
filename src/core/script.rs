use crate::core::error::AppError;
use serde::{Deserialize, Deserializer, Serialize};

/// The storyteller script returned by the generation endpoint.
///
/// Every field may be missing from the model's output; missing collections
/// come back empty and missing text comes back as `None`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Script {
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub story: Vec<StorySection>,
    #[serde(default, deserialize_with = "nullable")]
    pub key_takeaways: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub actionable_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedtime_wisdom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_estimate: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub glossary: Vec<GlossaryEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct StorySection {
    #[serde(default, deserialize_with = "nullable")]
    pub section: String,
    #[serde(default, deserialize_with = "nullable")]
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct GlossaryEntry {
    #[serde(default, deserialize_with = "nullable")]
    pub term: String,
    #[serde(default, deserialize_with = "nullable")]
    pub explanation: String,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Returns the text only when it has something to say.
pub fn present(text: &Option<String>) -> Option<&str> {
    text.as_deref().filter(|t| !t.trim().is_empty())
}

impl Script {
    /// Parses the raw chat completion content into a script.
    pub fn from_model_output(raw: &str) -> Result<Self, AppError> {
        let clean_json = strip_code_blocks(raw);
        serde_json::from_str::<Script>(&clean_json).map_err(|e| {
            log::error!("Failed to parse script JSON: {}. Body: {}", e, clean_json);
            AppError::MalformedOutput("生成的内容格式不正确".to_string())
        })
    }

    pub fn hook(&self) -> Option<&str> {
        present(&self.hook)
    }

    pub fn summary(&self) -> Option<&str> {
        present(&self.summary)
    }

    pub fn bedtime_wisdom(&self) -> Option<&str> {
        present(&self.bedtime_wisdom)
    }

    pub fn duration_estimate(&self) -> Option<&str> {
        present(&self.duration_estimate)
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}
