//! Pre-supervisor preprocessing.
//!
//! Normalizes one inbound message into a supervisor-ready processing
//! envelope: voice notes are downloaded (with channel credentials),
//! optionally transcoded to MP3 when ffmpeg is available, and
//! transcribed; the language is detected and an English rendering
//! produced; empty input short-circuits with a user-facing
//! `immediate_reply` that skips the supervisor entirely.

use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{info, warn};

use parley_tools::{DetectAndTranslateTool, SpeechClient, is_english_language};
use parley_types::envelope::INBOUND_ENVELOPE_SCHEMA;
use parley_types::{InboundEnvelope, MediaItem, ProcessingEnvelope};

/// User-facing message when a voice note cannot be transcribed.
const STT_ERROR_REPLY: &str =
    "Sorry, I couldn't transcribe that voice note. Please try again or send text.";

/// User-facing message when there is nothing to process.
const EMPTY_MESSAGE_REPLY: &str = "Send a message and I'll help.";

/// The preprocessor's output.
#[derive(Debug)]
pub struct PreSupervisorResult {
    /// Supervisor-ready envelope; `memory_context` is still unset (the
    /// worker injects it after the memory prefetch).
    pub envelope: ProcessingEnvelope,
    /// When set, skip the supervisor and reply with this text.
    pub immediate_reply: Option<String>,
}

/// Settings slice the preprocessor needs.
#[derive(Debug, Clone)]
pub struct PreprocessorConfig {
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub stt_model: String,
    /// Use the translations endpoint (English transcript) directly.
    pub force_english_transcript: bool,
}

/// Media -> transcript -> language normalization -> envelope.
pub struct Preprocessor {
    speech: Arc<SpeechClient>,
    detect: Arc<DetectAndTranslateTool>,
    http: reqwest::Client,
    config: PreprocessorConfig,
}

impl Preprocessor {
    pub fn new(
        speech: Arc<SpeechClient>,
        detect: Arc<DetectAndTranslateTool>,
        config: PreprocessorConfig,
    ) -> Self {
        Self {
            speech,
            detect,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Normalize one inbound message.
    pub async fn prepare(
        &self,
        inbound: &InboundEnvelope,
        stream_message_id: &str,
    ) -> PreSupervisorResult {
        let inbound_has_audio = inbound.metadata.has_audio();
        let mut text = inbound.text.trim().to_string();

        if text.is_empty() && inbound_has_audio {
            let audio = inbound.metadata.first_audio().cloned();
            if let Some(audio) = audio {
                info!(
                    stream_message_id,
                    content_type = %audio.content_type,
                    "audio message detected"
                );
                match self.transcribe_media(&audio).await {
                    Ok(transcript) if !transcript.is_empty() => {
                        info!(stream_message_id, chars = transcript.len(), "audio transcribed");
                        text = transcript;
                    }
                    Ok(_) => {
                        warn!(stream_message_id, "empty transcription result");
                        return self.immediate(inbound, stream_message_id, true, STT_ERROR_REPLY);
                    }
                    Err(e) => {
                        warn!(stream_message_id, error = %e, "STT failed for audio message");
                        return self.immediate(inbound, stream_message_id, true, STT_ERROR_REPLY);
                    }
                }
            }
        }

        if text.is_empty() {
            return self.immediate(
                inbound,
                stream_message_id,
                inbound_has_audio,
                EMPTY_MESSAGE_REPLY,
            );
        }

        // Language detection defaults to English when the call fails.
        let (detected_language, english_text) = match self.detect.detect(&text, None).await {
            Ok((language, english)) => {
                let english = if english.trim().is_empty() {
                    text.clone()
                } else {
                    english.trim().to_string()
                };
                (language, english)
            }
            Err(e) => {
                warn!(stream_message_id, error = %e, "language detection failed, assuming English");
                ("English".to_string(), text.clone())
            }
        };
        let is_english = is_english_language(&detected_language);

        PreSupervisorResult {
            envelope: self.envelope(
                inbound,
                stream_message_id,
                text,
                english_text,
                detected_language,
                is_english,
                inbound_has_audio,
            ),
            immediate_reply: None,
        }
    }

    fn immediate(
        &self,
        inbound: &InboundEnvelope,
        stream_message_id: &str,
        inbound_has_audio: bool,
        reply: &str,
    ) -> PreSupervisorResult {
        PreSupervisorResult {
            envelope: self.envelope(
                inbound,
                stream_message_id,
                String::new(),
                String::new(),
                String::new(),
                true,
                inbound_has_audio,
            ),
            immediate_reply: Some(reply.to_string()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn envelope(
        &self,
        inbound: &InboundEnvelope,
        stream_message_id: &str,
        original_text: String,
        english_text: String,
        detected_language: String,
        is_english: bool,
        inbound_has_audio: bool,
    ) -> ProcessingEnvelope {
        ProcessingEnvelope {
            schema: INBOUND_ENVELOPE_SCHEMA.into(),
            source: inbound.source.clone(),
            user_id: inbound.user_id.clone(),
            message_id: inbound.message_id.clone(),
            conversation_id: inbound.conversation_id.clone(),
            stream_message_id: stream_message_id.to_string(),
            timestamp: Some(inbound.timestamp.to_rfc3339()),
            original_text,
            english_text,
            detected_language,
            is_english,
            requires_translation_to_english: !is_english,
            inbound_has_audio,
            reply_in_audio: inbound_has_audio,
            memory_context: None,
        }
    }

    /// Download, (maybe) transcode, and transcribe one audio item.
    async fn transcribe_media(&self, audio: &MediaItem) -> crate::Result<String> {
        let work_dir = std::env::temp_dir().join(format!(
            "parley-audio-{}",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(parley_tools::SpeechError::Io)
            .map_err(crate::RuntimeError::Speech)?;

        let raw_path = work_dir.join(format!("input_audio{}", ext_from_content_type(&audio.content_type)));
        self.download_media(&audio.url, &raw_path).await?;

        // Prefer an MP3 rendition when ffmpeg is around; fall back to
        // the raw download otherwise.
        let mp3_path = work_dir.join("input_audio.mp3");
        let use_path = if transcode_to_mp3(&raw_path, &mp3_path).await {
            mp3_path
        } else {
            raw_path
        };

        let transcript = if self.config.force_english_transcript {
            self.speech
                .translate_to_english(&use_path, &self.config.stt_model)
                .await
        } else {
            self.speech
                .transcribe(&use_path, &self.config.stt_model, None)
                .await
        };

        let _ = tokio::fs::remove_dir_all(&work_dir).await;
        Ok(transcript
            .map_err(crate::RuntimeError::Speech)?
            .trim()
            .to_string())
    }

    /// Fetch a provider-hosted media URL using basic auth.
    async fn download_media(&self, url: &str, dst: &Path) -> crate::Result<()> {
        let sid = self.config.twilio_account_sid.as_deref().unwrap_or_default();
        let token = self.config.twilio_auth_token.as_deref().unwrap_or_default();
        if sid.is_empty() || token.is_empty() {
            return Err(crate::RuntimeError::Config(
                "twilio credentials missing for media download".into(),
            ));
        }

        let auth = BASE64.encode(format!("{sid}:{token}"));
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Basic {auth}"))
            .send()
            .await
            .map_err(|e| crate::RuntimeError::Config(format!("media download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::RuntimeError::Config(format!(
                "media download failed with status {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| crate::RuntimeError::Config(format!("media download failed: {e}")))?;
        tokio::fs::write(dst, &bytes)
            .await
            .map_err(parley_tools::SpeechError::Io)
            .map_err(crate::RuntimeError::Speech)?;
        Ok(())
    }
}

/// Map an audio content type to a file extension for the STT upload.
fn ext_from_content_type(content_type: &str) -> &'static str {
    let ct = content_type.to_ascii_lowercase();
    if ct.starts_with("audio/ogg") {
        ".ogg"
    } else if ct.starts_with("audio/opus") {
        ".opus"
    } else if ct.starts_with("audio/mpeg") {
        ".mp3"
    } else if ct.starts_with("audio/mp4") || ct.starts_with("audio/m4a") {
        ".m4a"
    } else if ct.starts_with("audio/wav") {
        ".wav"
    } else {
        ".bin"
    }
}

/// Best-effort ffmpeg transcode; false when ffmpeg is absent or fails.
async fn transcode_to_mp3(src: &Path, dst: &Path) -> bool {
    let result = tokio::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(src)
        .arg(dst)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(code = ?status.code(), "ffmpeg transcode failed, using raw audio");
            false
        }
        Err(_) => false,
    }
}
