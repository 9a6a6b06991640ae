use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::{json, Value};
use std::time::Instant;
use uuid::Uuid;

use crate::state::AppState;

pub const HEALTH_PATH: &str = "/ping";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Largest body read for logging. Bigger bodies, and bodies of unknown length, are passed on
/// untouched and logged without content.
const MAX_LOGGED_BODY: usize = 1024 * 1024;

const STATIC_PREFIXES: [&str; 4] = ["/_next/", "/favicon.ico", "/sitemap.xml", "/robots.txt"];

/// Correlation id of the current request, available to handlers as an extension
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

fn is_static(path: &str) -> bool {
    STATIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn declared_length(request: &Request) -> Option<usize> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Buffer the body so it can be logged, then put it back for the handler
async fn capture_body(request: Request) -> (Request, Option<Value>) {
    match declared_length(&request) {
        Some(length) if length <= MAX_LOGGED_BODY => {}
        _ => return (request, None),
    }

    let (parts, body) = request.into_parts();
    match to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(bytes) => {
            let parsed = serde_json::from_slice::<Value>(&bytes).ok();
            (Request::from_parts(parts, Body::from(bytes)), parsed)
        }
        // the body broke or outgrew its content-length; the handler sees an empty body
        Err(_) => (Request::from_parts(parts, Body::empty()), None),
    }
}

/// Redirect the request should get instead of reaching its handler
async fn auth_gate(state: &AppState, uri: &Uri, headers: &HeaderMap) -> Option<Response> {
    let path = uri.path();
    if path.starts_with("/api/auth") {
        return None;
    }

    match state.sessions.resolve(headers).await {
        None => {
            let original = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or(path);
            let target = format!(
                "/api/auth/guest?redirectUrl={}",
                urlencoding::encode(original)
            );
            Some(Redirect::temporary(&target).into_response())
        }
        Some(session) if !session.is_guest() && (path == "/login" || path == "/register") => {
            Some(Redirect::temporary("/").into_response())
        }
        Some(_) => None,
    }
}

/// Logs every request with a correlation id and sends visitors without a session to get
/// a guest one.
pub async fn request_logging(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if path == HEALTH_PATH {
        return "pong".into_response();
    }
    if is_static(&path) {
        return next.run(request).await;
    }

    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let query = request.uri().query().map(str::to_string);

    let (mut request, body) = if is_mutating(&method) {
        capture_body(request).await
    } else {
        (request, None)
    };

    state.logger.info(
        "request received",
        json!({
            "requestId": request_id,
            "method": method.as_str(),
            "path": path,
            "query": query,
            "body": body,
        }),
    );

    let started = Instant::now();
    request.extensions_mut().insert(RequestId(request_id.clone()));
    let redirect = auth_gate(&state, request.uri(), request.headers()).await;
    let mut response = match redirect {
        Some(redirect) => redirect,
        None => next.run(request).await,
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    state.logger.info(
        "request completed",
        json!({
            "requestId": request_id,
            "method": method.as_str(),
            "path": path,
            "status": response.status().as_u16(),
            "durationMs": started.elapsed().as_millis() as u64,
        }),
    );

    response
}
