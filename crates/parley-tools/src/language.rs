//! Local language tools.
//!
//! Language normalization for the pipeline: detect-and-translate-to-
//! English (used by the preprocessor and exposed to the supervisor) and
//! translate-to-target (used when replying in the user's language).
//! Both are thin structured-output calls against the shared LLM
//! provider, tagged with the `local_audio` source server.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use parley_llm::{Provider, complete_structured};
use parley_llm::types::ChatMessage;

use crate::LOCAL_AUDIO_SOURCE;
use crate::context::ToolContext;
use crate::registry::{Tool, ToolError};

/// Tool name for language detection + translation to English.
pub const DETECT_TOOL_NAME: &str = "local_audio_detect_and_translate_to_english";

/// Tool name for translation to a target language.
pub const TRANSLATE_TOOL_NAME: &str = "local_audio_translate_text";

/// Whether a detected language string means English.
pub fn is_english_language(language: &str) -> bool {
    matches!(
        language.trim().to_ascii_lowercase().as_str(),
        "english" | "en" | "en-us" | "en-gb"
    )
}

#[derive(Debug, Deserialize)]
struct DetectToEnglishOut {
    detected_language: String,
    english_text: String,
}

#[derive(Debug, Deserialize)]
struct TranslateOut {
    translated_text: String,
}

/// Detect the language of a text and translate it to English.
pub struct DetectAndTranslateTool {
    provider: Arc<dyn Provider>,
    model: String,
}

impl DetectAndTranslateTool {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Direct call used by the preprocessor, bypassing tool dispatch.
    ///
    /// Returns `(detected_language, english_text)`.
    pub async fn detect(
        &self,
        text: &str,
        hint_language: Option<&str>,
    ) -> Result<(String, String), ToolError> {
        let mut prompt = String::from(
            "Task: detect the language of the user's text and translate it to English.\n\
             Rules:\n\
             - If text is already English, return english_text equal to the input.\n\
             - Keep meaning and names.\n\
             - detected_language can be a common language name (e.g., Hindi) or ISO code.\n",
        );
        if let Some(hint) = hint_language {
            prompt.push_str(&format!("\nHint: the user may be using: {hint}\n"));
        }
        prompt.push_str(&format!("\nUser text:\n{text}\n"));

        let out: DetectToEnglishOut = complete_structured(
            self.provider.as_ref(),
            &self.model,
            vec![ChatMessage::user(prompt)],
            "detect_to_english",
            json!({
                "type": "object",
                "properties": {
                    "detected_language": {
                        "type": "string",
                        "description": "Detected language name or ISO code (best effort)"
                    },
                    "english_text": {
                        "type": "string",
                        "description": "Translation of the input into English (preserve meaning)"
                    }
                },
                "required": ["detected_language", "english_text"]
            }),
        )
        .await
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        debug!(detected = %out.detected_language, "language detected");
        Ok((out.detected_language, out.english_text))
    }
}

#[async_trait]
impl Tool for DetectAndTranslateTool {
    fn name(&self) -> &str {
        DETECT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Detect the input language and translate the text to English. \
         Returns {detected_language, english_text}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Input text in any language"
                },
                "hint_language": {
                    "type": "string",
                    "description": "Optional hint about the source language"
                }
            },
            "required": ["text"]
        }))
    }

    fn source_server(&self) -> &str {
        LOCAL_AUDIO_SOURCE
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("text is required".into()))?;
        let hint = args.get("hint_language").and_then(Value::as_str);
        let (detected_language, english_text) = self.detect(text, hint).await?;
        Ok(json!({
            "detected_language": detected_language,
            "english_text": english_text,
        }))
    }
}

/// Translate text to a target language.
pub struct TranslateTextTool {
    provider: Arc<dyn Provider>,
    model: String,
}

impl TranslateTextTool {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Direct call, also used by the worker for error-message localization.
    pub async fn translate(
        &self,
        text: &str,
        target_language: &str,
        source_language: Option<&str>,
    ) -> Result<String, ToolError> {
        let mut prompt = format!(
            "Task: translate the user's text to the requested target language.\n\
             Rules:\n\
             - Preserve meaning and proper nouns.\n\
             - Return ONLY the translated text (no extra commentary).\n\
             - Target language: {target_language}\n"
        );
        if let Some(source) = source_language {
            prompt.push_str(&format!("- Source language (hint): {source}\n"));
        }
        prompt.push_str(&format!("\nText:\n{text}\n"));

        let out: TranslateOut = complete_structured(
            self.provider.as_ref(),
            &self.model,
            vec![ChatMessage::user(prompt)],
            "translate_text",
            json!({
                "type": "object",
                "properties": {
                    "translated_text": {
                        "type": "string",
                        "description": "Translated text in the requested target language"
                    }
                },
                "required": ["translated_text"]
            }),
        )
        .await
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(out.translated_text)
    }
}

#[async_trait]
impl Tool for TranslateTextTool {
    fn name(&self) -> &str {
        TRANSLATE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Translate text to a target language. Returns the translated text only."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to translate"
                },
                "target_language": {
                    "type": "string",
                    "description": "Target language (e.g., 'Hindi', 'es', 'French')"
                },
                "source_language": {
                    "type": "string",
                    "description": "Optional hint about the source language"
                }
            },
            "required": ["text", "target_language"]
        }))
    }

    fn source_server(&self) -> &str {
        LOCAL_AUDIO_SOURCE
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("text is required".into()))?;
        let target = args
            .get("target_language")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("target_language is required".into()))?;
        let source = args.get("source_language").and_then(Value::as_str);
        let translated = self.translate(text, target, source).await?;
        Ok(Value::String(translated))
    }
}
