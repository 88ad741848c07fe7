//! Media host.
//!
//! Serves locally generated media (TTS audio) so the messaging provider
//! can fetch it as a public URL. Path containment is strict: the
//! resolved target must equal the resolved root or live under it.
//! Traversal attempts answer 400, absent files 404.

use std::path::{Component, Path, PathBuf};

use axum::extract::{Path as AxumPath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use parley_tools::speech::guess_audio_mime;

use crate::GatewayState;

/// `GET /media/{*rel_path}`
pub async fn get_media(
    State(state): State<GatewayState>,
    AxumPath(rel_path): AxumPath<String>,
) -> Response {
    let root = PathBuf::from(&state.settings.media_root_dir);
    let resolved = match safe_resolve_under_root(&root, &rel_path) {
        Ok(path) => path,
        Err(status) => return status.into_response(),
    };

    match tokio::fs::read(&resolved).await {
        Ok(bytes) => {
            debug!(path = %resolved.display(), bytes = bytes.len(), "media served");
            ([(header::CONTENT_TYPE, content_type_for(&rel_path))], bytes).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Resolve a request path strictly under the media root.
///
/// Rejects parent-directory components outright (400), answers 404 for
/// anything that does not resolve to an existing regular file, and
/// re-checks containment on the canonicalized path so symlinks cannot
/// escape the root.
pub fn safe_resolve_under_root(root: &Path, rel_path: &str) -> Result<PathBuf, StatusCode> {
    let rel = Path::new(rel_path);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        warn!(rel_path, "media path traversal rejected");
        return Err(StatusCode::BAD_REQUEST);
    }

    let root_resolved = root.canonicalize().map_err(|_| StatusCode::NOT_FOUND)?;
    let candidate = root_resolved.join(rel);
    let resolved = candidate.canonicalize().map_err(|_| StatusCode::NOT_FOUND)?;

    if resolved != root_resolved && !resolved.starts_with(&root_resolved) {
        warn!(rel_path, "media path escaped root after resolution");
        return Err(StatusCode::BAD_REQUEST);
    }
    if !resolved.is_file() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(resolved)
}

/// Content type from the request path; audio types resolve properly,
/// everything else is served as octets.
fn content_type_for(rel_path: &str) -> &'static str {
    guess_audio_mime(rel_path)
}
