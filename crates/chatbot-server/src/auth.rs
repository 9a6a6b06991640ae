//! Session lookup. Sessions live in process memory and are addressed by an opaque token sent
//! either as a bearer token or in the `session_token` cookie.
use axum::http::{header, HeaderMap};
use chatbot::models::session::{Session, UserType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session_token";

/// Lifetime of a session, also sent as the cookie's Max-Age
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

struct Entry {
    session: Session,
    created_at: Instant,
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Register a session and return the token that identifies it. Expired sessions are
    /// dropped on the way.
    pub async fn create(&self, session: Session) -> String {
        let token = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        sessions.insert(
            token.clone(),
            Entry {
                session,
                created_at: Instant::now(),
            },
        );
        token
    }

    /// A fresh guest user with its own session
    pub async fn create_guest(&self) -> (String, Session) {
        let session = Session::new(format!("guest-{}", Uuid::new_v4()), UserType::Guest);
        let token = self.create(session.clone()).await;
        (token, session)
    }

    pub async fn get(&self, token: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(token)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .map(|entry| entry.session.clone())
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// The session the request carries, if any
    pub async fn resolve(&self, headers: &HeaderMap) -> Option<Session> {
        let token = session_token(headers)?;
        self.get(&token).await
    }
}

/// Token from `Authorization: Bearer <token>`, falling back to the session cookie
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
