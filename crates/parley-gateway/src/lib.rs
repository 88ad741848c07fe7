//! HTTP ingress.
//!
//! Two routes, no agent work in-band:
//!
//! - `POST /webhooks/whatsapp` -- validates the provider signature,
//!   normalizes the form payload, publishes to the inbound stream, and
//!   returns 200 immediately
//! - `GET /media/{*path}` -- serves locally generated media (TTS audio)
//!   from the configured root with strict path-traversal protection

pub mod ingress;
pub mod media;
pub mod signature;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tracing::info;

use parley_stream::InboundPublisher;
use parley_types::Settings;

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    pub settings: Arc<Settings>,
    pub publisher: Arc<InboundPublisher>,
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/webhooks/whatsapp", post(ingress::whatsapp_webhook))
        .route("/media/{*rel_path}", get(media::get_media))
        .with_state(state)
}

/// Serve the gateway until the token is cancelled.
pub async fn serve(
    state: GatewayState,
    bind_addr: &str,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
