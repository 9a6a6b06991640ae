use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::auth::{SESSION_COOKIE, SESSION_TTL};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuestParams {
    redirect_url: Option<String>,
}

/// Only same-site destinations are followed; absolute urls are cut down to their path
fn safe_redirect(target: Option<&str>) -> String {
    let Some(target) = target.filter(|t| !t.is_empty()) else {
        return "/".to_string();
    };

    if target.starts_with('/') && !target.starts_with("//") {
        return target.to_string();
    }

    match Url::parse(target) {
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        },
        Err(_) => "/".to_string(),
    }
}

async fn guest_sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<GuestParams>,
) -> Response {
    if state.sessions.resolve(&headers).await.is_some() {
        return Redirect::temporary("/").into_response();
    }

    let (token, session) = state.sessions.create_guest().await;
    state
        .logger
        .info("guest session created", json!({ "userId": session.user_id }));

    let cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE,
        token,
        SESSION_TTL.as_secs()
    );
    let target = safe_redirect(params.redirect_url.as_deref());
    ([(header::SET_COOKIE, cookie)], Redirect::temporary(&target)).into_response()
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/guest", get(guest_sign_in))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::TestApp;
    use axum::http::{Method, StatusCode};
    use chatbot::providers::mock::MockProvider;

    #[test]
    fn test_safe_redirect() {
        assert_eq!(safe_redirect(None), "/");
        assert_eq!(safe_redirect(Some("/chat/1?x=2")), "/chat/1?x=2");
        assert_eq!(safe_redirect(Some("//evil.example.com")), "/");
        assert_eq!(
            safe_redirect(Some("https://evil.example.com/steal?a=1")),
            "/steal?a=1"
        );
        assert_eq!(safe_redirect(Some("not a url")), "/");
    }

    #[tokio::test]
    async fn test_guest_sign_in_sets_cookie_and_redirects() {
        let app = TestApp::new(MockProvider::new(vec![]));

        let response = app
            .send(
                Method::GET,
                "/api/auth/guest?redirectUrl=%2Fchat%2Fabc",
                None,
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/chat/abc");

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.contains("Max-Age=2592000"));
        let token = cookie
            .strip_prefix("session_token=")
            .and_then(|rest| rest.split(';').next())
            .unwrap();
        let session = app.sessions.get(token).await.unwrap();
        assert!(session.is_guest());

        // signed in already: straight home, no new session
        let response = app
            .send(Method::GET, "/api/auth/guest?redirectUrl=%2Fx", Some(token), None)
            .await;
        assert_eq!(response.headers()[header::LOCATION], "/");
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
