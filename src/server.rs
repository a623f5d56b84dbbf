//! HTTP surface: liveness endpoints and on-demand name extraction.

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::reports::NameExtractor;

/// Largest report accepted by `/extract-name/`.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared state for the HTTP routes.
#[derive(Clone)]
pub struct ServerState {
    pub extractor: NameExtractor,
}

/// GET /
async fn home() -> &'static str {
    "Mail fetcher is running ✅"
}

/// GET /health
async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// POST /extract-name/
///
/// Multipart upload with a `file` field; returns `{patient_name, source}`.
async fn extract_name(State(state): State<ServerState>, mut multipart: Multipart) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(format!("Invalid multipart body: {e}")),
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload.pdf").to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return bad_request(format!("Failed to read file: {e}")),
        };

        return match state.extractor.extract_blocking(bytes.to_vec(), filename).await {
            Ok(extraction) => Json(extraction).into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response(),
        };
    }

    bad_request("Missing multipart field 'file'".into())
}

/// Build the HTTP routes.
pub fn routes(state: ServerState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/extract-name/", post(extract_name))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: &ServerConfig, state: ServerState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "HTTP server started");
    axum::serve(listener, routes(state)).await
}
