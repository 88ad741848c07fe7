//! Channel senders.
//!
//! The dispatcher delivers through a [`ChannelSender`] selected by the
//! envelope's `source`. Today that means Twilio WhatsApp; the trait is
//! the seam new channels plug into.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// Delivery failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The sender is missing required credentials or configuration.
    #[error("channel misconfigured: {0}")]
    Config(String),

    /// The HTTP request failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider rejected the send.
    #[error("delivery failed | status={status} | body={body}")]
    Api { status: u16, body: String },

    /// The provider response could not be parsed.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// A channel adapter that can deliver replies to a user.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// The `source` tag this sender handles (e.g. `whatsapp`).
    fn source(&self) -> &str;

    /// Deliver a text message; returns the provider message id.
    async fn send_text(&self, to: &str, body: &str) -> Result<String, ChannelError>;

    /// Deliver text plus a media attachment by public URL.
    async fn send_media(
        &self,
        to: &str,
        body: &str,
        media_url: &str,
    ) -> Result<String, ChannelError>;
}

/// Default Twilio REST API base.
const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Sends WhatsApp messages via the Twilio REST API.
#[derive(Debug)]
pub struct TwilioWhatsAppSender {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    whatsapp_from: String,
}

impl TwilioWhatsAppSender {
    /// Build a sender; all three credentials are required.
    pub fn new(
        account_sid: Option<String>,
        auth_token: Option<String>,
        whatsapp_from: Option<String>,
    ) -> Result<Self, ChannelError> {
        let account_sid = account_sid
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChannelError::Config("twilio_account_sid is missing".into()))?;
        let auth_token = auth_token
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChannelError::Config("twilio_auth_token is missing".into()))?;
        let whatsapp_from = whatsapp_from
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChannelError::Config("twilio_whatsapp_from is missing".into()))?;

        Ok(Self {
            http: reqwest::Client::new(),
            api_base: TWILIO_API_BASE.into(),
            account_sid,
            auth_token,
            whatsapp_from,
        })
    }

    /// Point the sender at a different API base (tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
    }

    async fn post_message(&self, form: &HashMap<&str, &str>) -> Result<String, ChannelError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
        let sid = payload
            .get("sid")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::InvalidResponse("missing 'sid'".into()))?;
        Ok(sid.to_string())
    }
}

#[async_trait]
impl ChannelSender for TwilioWhatsAppSender {
    fn source(&self) -> &str {
        "whatsapp"
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<String, ChannelError> {
        if to.is_empty() || body.is_empty() {
            return Err(ChannelError::Config("'to' and 'body' are required".into()));
        }
        info!(to, "sending WhatsApp message");
        let form = HashMap::from([
            ("From", self.whatsapp_from.as_str()),
            ("To", to),
            ("Body", body),
        ]);
        let sid = self.post_message(&form).await?;
        info!(to, sid = %sid, "WhatsApp send success");
        Ok(sid)
    }

    async fn send_media(
        &self,
        to: &str,
        body: &str,
        media_url: &str,
    ) -> Result<String, ChannelError> {
        if to.is_empty() || media_url.is_empty() {
            return Err(ChannelError::Config("'to' and 'media_url' are required".into()));
        }
        info!(to, media_url, "sending WhatsApp media message");
        let form = HashMap::from([
            ("From", self.whatsapp_from.as_str()),
            ("To", to),
            ("Body", body),
            ("MediaUrl", media_url),
        ]);
        let sid = self.post_message(&form).await?;
        info!(to, sid = %sid, "WhatsApp media send success");
        Ok(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(server: &mockito::Server) -> TwilioWhatsAppSender {
        TwilioWhatsAppSender::new(
            Some("AC_test".into()),
            Some("token".into()),
            Some("whatsapp:+10000000000".into()),
        )
        .unwrap()
        .with_api_base(server.url())
    }

    #[test]
    fn missing_credentials_rejected() {
        let err = TwilioWhatsAppSender::new(None, Some("t".into()), Some("f".into())).unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
        assert!(
            TwilioWhatsAppSender::new(Some("sid".into()), Some("".into()), Some("f".into()))
                .is_err()
        );
    }

    #[tokio::test]
    async fn send_text_posts_form_and_returns_sid() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/2010-04-01/Accounts/AC_test/Messages.json")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("To".into(), "whatsapp:+19998887777".into()),
                mockito::Matcher::UrlEncoded("Body".into(), "hello".into()),
            ]))
            .with_status(201)
            .with_body(r#"{"sid": "SM_123"}"#)
            .create_async()
            .await;

        let sid = sender(&server)
            .send_text("whatsapp:+19998887777", "hello")
            .await
            .unwrap();
        assert_eq!(sid, "SM_123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn send_media_includes_media_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/2010-04-01/Accounts/AC_test/Messages.json")
            .match_body(mockito::Matcher::UrlEncoded(
                "MediaUrl".into(),
                "https://cdn.example.com/media/tts/a.mp3".into(),
            ))
            .with_status(201)
            .with_body(r#"{"sid": "SM_124"}"#)
            .create_async()
            .await;

        let sid = sender(&server)
            .send_media(
                "whatsapp:+19998887777",
                "your note",
                "https://cdn.example.com/media/tts/a.mp3",
            )
            .await
            .unwrap();
        assert_eq!(sid, "SM_124");
    }

    #[tokio::test]
    async fn provider_rejection_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/2010-04-01/Accounts/AC_test/Messages.json")
            .with_status(400)
            .with_body(r#"{"message": "invalid To"}"#)
            .create_async()
            .await;

        let err = sender(&server)
            .send_text("whatsapp:+1", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn empty_body_rejected_before_http() {
        let server = mockito::Server::new_async().await;
        let err = sender(&server).send_text("whatsapp:+1", "").await.unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }
}
