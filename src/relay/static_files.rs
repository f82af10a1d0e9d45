//! Plain HTTP GET handling for the chat page and its assets.
//!
//! Files come from [`ServeDir`] under the configured content root. `/` maps
//! to the index file, and anything missing answers 404 with a short text
//! body.

use std::path::Path;

use axum::Router;
use axum::handler::HandlerWithoutStateExt;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tower_http::services::{ServeDir, ServeFile};
use tracing::debug;

use crate::error::Error;

/// Body of every 404 answer.
pub const NOT_FOUND_BODY: &str = "File not found";

async fn not_found(uri: Uri) -> Error {
    Error::StaticAssetNotFound(uri.path().to_string())
}

/// Routes serving `root`, with `index_file` answering `/`.
pub fn routes<S>(root: &Path, index_file: &str) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let files = ServeDir::new(root).not_found_service(not_found.into_service());
    Router::new()
        .route_service("/", ServeFile::new(root.join(index_file)))
        .fallback_service(files)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::StaticAssetNotFound(path) => {
                debug!(path = %path, "static asset not found");
                return (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response();
            }
            Error::InvalidHandshake(_) | Error::HandshakeTooLarge { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        debug!(status = status.as_u16(), error = %self, "request failed");
        (status, self.to_string()).into_response()
    }
}
