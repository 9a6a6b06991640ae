// Export route modules
pub mod auth;
pub mod chat;
pub mod document;
pub mod history;
pub mod vote;

#[cfg(test)]
pub(crate) mod test_support;

use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{body::Body, middleware, Router};
use bytes::Bytes;
use chatbot::models::session::Session;
use futures::stream::{BoxStream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::error::{ChatError, ErrorType, Surface};
use crate::middleware::{request_logging, HEALTH_PATH};
use crate::state::AppState;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(chat::routes(state.clone()))
        .merge(history::routes(state.clone()))
        .merge(vote::routes(state.clone()))
        .merge(document::routes(state.clone()))
        .merge(auth::routes(state))
}

/// The routes wrapped in request logging, the auth gate, CORS and the request timeout
pub fn app(state: AppState, max_duration: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    configure(state.clone())
        .route(HEALTH_PATH, get(|| async { "pong" }))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(middleware::from_fn_with_state(state, request_logging))
        .layer(TimeoutLayer::new(max_duration))
        .layer(cors)
}

/// The caller's session, or `unauthorized` on `surface`
pub(crate) async fn require_session(
    state: &AppState,
    headers: &HeaderMap,
    surface: Surface,
) -> Result<Session, ChatError> {
    state
        .sessions
        .resolve(headers)
        .await
        .ok_or_else(|| ChatError::new(ErrorType::Unauthorized, surface))
}

/// Serve encoded data stream lines with the AI data stream (v1) headers
pub(crate) fn data_stream_response(lines: BoxStream<'static, String>) -> Response {
    let body = Body::from_stream(lines.map(|line| Ok::<_, Infallible>(Bytes::from(line))));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-vercel-ai-data-stream"), "v1"),
        ],
        body,
    )
        .into_response()
}
