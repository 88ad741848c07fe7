//! Speech-to-text and text-to-speech clients, plus the local TTS tool.
//!
//! The STT client talks to the OpenAI transcription/translation
//! endpoints with multipart uploads; the TTS client returns raw audio
//! bytes. [`TextToSpeechTool`] wraps synthesis as a `local_audio` tool
//! that writes the audio to a temp file and returns
//! `{file_path, format}` -- hosting the file publicly is the worker's
//! job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::LOCAL_AUDIO_SOURCE;
use crate::context::ToolContext;
use crate::registry::{Tool, ToolError};

/// Tool name for local speech synthesis.
pub const TTS_TOOL_NAME: &str = "local_audio_text_to_speech";

/// Errors from the speech clients.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("OpenAI API key is missing (OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech API failed | status={status} | body={body}")]
    Api { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Endpoints and credentials for the speech clients.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub transcriptions_url: String,
    pub translations_url: String,
    pub tts_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            transcriptions_url: "https://api.openai.com/v1/audio/transcriptions".into(),
            translations_url: "https://api.openai.com/v1/audio/translations".into(),
            tts_url: "https://api.openai.com/v1/audio/speech".into(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// STT + TTS HTTP client.
pub struct SpeechClient {
    config: SpeechConfig,
    http: reqwest::Client,
}

impl SpeechClient {
    pub fn new(config: SpeechConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    fn api_key(&self) -> Result<&str, SpeechError> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(SpeechError::MissingApiKey)
    }

    async fn audio_form(
        &self,
        file_path: &Path,
        model: &str,
        language: Option<&str>,
    ) -> Result<reqwest::multipart::Form, SpeechError> {
        let data = tokio::fs::read(file_path).await?;
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".into());
        let mime = guess_audio_mime(&filename);

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(filename)
            .mime_str(mime)?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", model.to_string())
            .text("response_format", "json")
            .part("file", part);
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }
        Ok(form)
    }

    async fn submit_audio(
        &self,
        url: &str,
        form: reqwest::multipart::Form,
    ) -> Result<String, SpeechError> {
        let api_key = self.api_key()?.to_string();
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SpeechError::InvalidResponse(e.to_string()))?;
        Ok(payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// Transcribe an audio file in its original language.
    pub async fn transcribe(
        &self,
        file_path: &Path,
        model: &str,
        language: Option<&str>,
    ) -> Result<String, SpeechError> {
        debug!(file = %file_path.display(), model, "stt transcribe");
        let form = self.audio_form(file_path, model, language).await?;
        self.submit_audio(&self.config.transcriptions_url, form)
            .await
    }

    /// Transcribe an audio file directly into English.
    pub async fn translate_to_english(
        &self,
        file_path: &Path,
        model: &str,
    ) -> Result<String, SpeechError> {
        debug!(file = %file_path.display(), model, "stt translate to english");
        let form = self.audio_form(file_path, model, None).await?;
        self.submit_audio(&self.config.translations_url, form).await
    }

    /// Synthesize speech; returns raw audio bytes.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        model: &str,
        format: &str,
    ) -> Result<Vec<u8>, SpeechError> {
        let api_key = self.api_key()?.to_string();
        let response = self
            .http
            .post(&self.config.tts_url)
            .bearer_auth(api_key)
            .json(&json!({
                "model": model,
                "voice": voice,
                "input": text,
                "format": format,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Guess an audio MIME type from a file name.
pub fn guess_audio_mime(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    match lower.rsplit('.').next() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Defaults for the TTS tool, taken from settings at bootstrap.
#[derive(Debug, Clone)]
pub struct TtsDefaults {
    pub voice: String,
    pub model: String,
    pub format: String,
}

impl Default for TtsDefaults {
    fn default() -> Self {
        Self {
            voice: "alloy".into(),
            model: "tts-1".into(),
            format: "mp3".into(),
        }
    }
}

/// Convert text into a speech audio file saved locally.
pub struct TextToSpeechTool {
    client: Arc<SpeechClient>,
    defaults: TtsDefaults,
}

impl TextToSpeechTool {
    pub fn new(client: Arc<SpeechClient>, defaults: TtsDefaults) -> Self {
        Self { client, defaults }
    }

    /// Configured synthesis defaults.
    pub fn defaults(&self) -> &TtsDefaults {
        &self.defaults
    }

    /// Synthesize to a fresh temp file; returns `(path, format)`.
    pub async fn synthesize_to_file(
        &self,
        text: &str,
        voice: &str,
        model: &str,
        format: &str,
    ) -> Result<(PathBuf, String), ToolError> {
        let audio = self
            .client
            .synthesize(text, voice, model, format)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let path = std::env::temp_dir().join(format!(
            "parley-tts-{}.{format}",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&path, &audio)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to write audio: {e}")))?;

        info!(file = %path.display(), bytes = audio.len(), "tts audio written");
        Ok((path, format.to_string()))
    }
}

#[async_trait]
impl Tool for TextToSpeechTool {
    fn name(&self) -> &str {
        TTS_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Convert text into a speech audio file saved locally. \
         Returns {file_path, format}."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to synthesize as speech"
                },
                "voice": {
                    "type": "string",
                    "description": "Voice name (e.g., alloy)"
                },
                "model": {
                    "type": "string",
                    "description": "TTS model name"
                },
                "format": {
                    "type": "string",
                    "description": "Audio format (mp3, wav, etc.)"
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
        let voice = args
            .get("voice")
            .and_then(Value::as_str)
            .unwrap_or(&self.defaults.voice);
        let model = args
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.defaults.model);
        let format = args
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or(&self.defaults.format);

        let (path, format) = self.synthesize_to_file(text, voice, model, format).await?;
        Ok(json!({
            "file_path": path.to_string_lossy(),
            "format": format,
        }))
    }
}
