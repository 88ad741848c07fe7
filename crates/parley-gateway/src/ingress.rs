//! Provider webhook ingress.
//!
//! Receives the messaging provider's form-encoded webhook, validates
//! the signature when enabled, normalizes the payload (text + ordered
//! media items), publishes to the inbound stream with a fresh
//! `message_id`, and answers 200 immediately. No supervisor work
//! happens here.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Form;
use tracing::{info, warn};

use parley_types::{MediaItem, MessageMetadata};

use crate::GatewayState;
use crate::signature::verify_signature;

/// Header carrying the provider signature.
const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// Webhook route path, appended to the public base URL for signature
/// validation.
const WEBHOOK_PATH: &str = "/webhooks/whatsapp";

/// `POST /webhooks/whatsapp`
pub async fn whatsapp_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Form(form): Form<BTreeMap<String, String>>,
) -> impl IntoResponse {
    let signature_present = headers.contains_key(SIGNATURE_HEADER);
    info!(
        from = form.get("From").map(String::as_str).unwrap_or(""),
        message_sid = form.get("MessageSid").map(String::as_str).unwrap_or(""),
        signature = signature_present,
        "inbound webhook received"
    );

    // Signature validation, when enabled.
    if state.settings.twilio_validate_signature {
        let Some(auth_token) = state
            .settings
            .twilio_auth_token
            .as_deref()
            .filter(|t| !t.is_empty())
        else {
            // Without the token, validation would silently always fail.
            warn!("signature validation enabled but twilio_auth_token is missing");
            return StatusCode::INTERNAL_SERVER_ERROR;
        };

        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let url = format!(
            "{}{WEBHOOK_PATH}",
            state.settings.base_url.trim_end_matches('/')
        );
        if !verify_signature(auth_token, &url, &form, signature) {
            warn!("webhook signature validation failed");
            return StatusCode::FORBIDDEN;
        }
    } else {
        warn!("webhook signature validation is DISABLED (local testing only)");
    }

    // Normalize.
    let user_id = form.get("From").map(String::as_str).unwrap_or("").trim();
    let text = form.get("Body").map(String::as_str).unwrap_or("").trim();
    let metadata = media_metadata(&form);

    // Reject payloads with nothing to process.
    if user_id.is_empty() || (text.is_empty() && metadata.num_media == 0) {
        warn!("invalid webhook payload rejected");
        return StatusCode::BAD_REQUEST;
    }

    match state
        .publisher
        .publish("whatsapp", user_id, text, None, metadata)
        .await
    {
        Ok((entry_id, envelope)) => {
            info!(
                entry_id = %entry_id,
                message_id = %envelope.message_id,
                user_id,
                "inbound message published"
            );
            StatusCode::OK
        }
        Err(e) => {
            warn!(error = %e, "failed to publish inbound message");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Build stream-safe media metadata from the webhook form.
///
/// Reads `NumMedia` plus `MediaUrl{i}` / `MediaContentType{i}` pairs;
/// items missing either field are skipped. The provider message id
/// travels in `extra`.
pub fn media_metadata(form: &BTreeMap<String, String>) -> MessageMetadata {
    let declared: usize = form
        .get("NumMedia")
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0);

    let mut media = Vec::new();
    for i in 0..declared {
        let url = form
            .get(&format!("MediaUrl{i}"))
            .map(|s| s.trim())
            .unwrap_or_default();
        let content_type = form
            .get(&format!("MediaContentType{i}"))
            .map(|s| s.trim())
            .unwrap_or_default();
        if url.is_empty() || content_type.is_empty() {
            continue;
        }
        media.push(MediaItem {
            url: url.to_string(),
            content_type: content_type.to_string(),
        });
    }

    let mut extra = serde_json::Map::new();
    if let Some(sid) = form.get("MessageSid").filter(|s| !s.is_empty()) {
        extra.insert("message_sid".into(), serde_json::json!(sid));
    }

    MessageMetadata {
        num_media: media.len(),
        media,
        extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn media_metadata_parses_items_in_order() {
        let meta = media_metadata(&form(&[
            ("NumMedia", "2"),
            ("MediaUrl0", "https://api.example.com/m/0"),
            ("MediaContentType0", "audio/ogg"),
            ("MediaUrl1", "https://api.example.com/m/1"),
            ("MediaContentType1", "image/jpeg"),
            ("MessageSid", "SM_1"),
        ]));
        assert_eq!(meta.num_media, 2);
        assert_eq!(meta.media[0].content_type, "audio/ogg");
        assert_eq!(meta.media[1].url, "https://api.example.com/m/1");
        assert_eq!(meta.extra["message_sid"], "SM_1");
    }

    #[test]
    fn media_metadata_skips_incomplete_items() {
        let meta = media_metadata(&form(&[
            ("NumMedia", "2"),
            ("MediaUrl0", "https://api.example.com/m/0"),
            // MediaContentType0 missing
            ("MediaUrl1", "https://api.example.com/m/1"),
            ("MediaContentType1", "audio/ogg"),
        ]));
        assert_eq!(meta.num_media, 1);
        assert_eq!(meta.media[0].url, "https://api.example.com/m/1");
    }

    #[test]
    fn media_metadata_handles_zero_and_garbage() {
        assert_eq!(media_metadata(&form(&[("NumMedia", "0")])).num_media, 0);
        assert_eq!(media_metadata(&form(&[("NumMedia", "abc")])).num_media, 0);
        assert_eq!(media_metadata(&form(&[])).num_media, 0);
    }
}
