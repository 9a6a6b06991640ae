//! Router harness shared by the route tests
use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
};
use chatbot::logging::Logger;
use chatbot::models::message::Message;
use chatbot::models::session::{Session, UserType};
use chatbot::providers::base::Provider;
use chatbot::providers::mock::MockProvider;
use chatbot::providers::registry::{ChatModel, ProviderRegistry};
use chatbot::store::{ChatStore, DbMessage, MemoryStore};
use chatbot::usage::UsageEnricher;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use crate::auth::SessionStore;
use crate::resumable::StreamHub;
use crate::state::AppState;

pub const USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";

/// Nothing listens here, so usage is never enriched in tests
const UNREACHABLE_CATALOG: &str = "http://127.0.0.1:9/api.json";

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub chat_provider: Arc<MockProvider>,
    pub sessions: SessionStore,
    providers: HashMap<ChatModel, Arc<dyn Provider>>,
    streams: Option<StreamHub>,
}

impl TestApp {
    pub fn new(chat_provider: MockProvider) -> Self {
        let chat_provider = Arc::new(chat_provider);
        let mut providers: HashMap<ChatModel, Arc<dyn Provider>> = HashMap::new();
        providers.insert(ChatModel::Chat, chat_provider.clone());
        providers.insert(
            ChatModel::ChatReasoning,
            Arc::new(MockProvider::new(vec![])),
        );
        providers.insert(ChatModel::Title, Arc::new(MockProvider::new(vec![])));
        providers.insert(ChatModel::Artifact, Arc::new(MockProvider::new(vec![])));

        Self {
            store: Arc::new(MemoryStore::new()),
            chat_provider,
            sessions: SessionStore::new(),
            providers,
            streams: None,
        }
    }

    /// The title model answers with `title` once
    pub fn with_title(self, title: &str) -> Self {
        self.with_provider(
            ChatModel::Title,
            Arc::new(MockProvider::new(vec![Message::assistant().with_text(title)])),
        )
    }

    pub fn with_provider(mut self, model: ChatModel, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(model, provider);
        self
    }

    pub fn without_provider(mut self, model: ChatModel) -> Self {
        self.providers.remove(&model);
        self
    }

    pub fn with_streams(mut self) -> Self {
        self.streams = Some(StreamHub::new());
        self
    }

    pub fn state(&self) -> AppState {
        let registry = self
            .providers
            .iter()
            .fold(ProviderRegistry::new(), |registry, (model, provider)| {
                registry.with(*model, provider.clone())
            });
        let mut state = AppState::new(
            self.store.clone(),
            registry,
            UsageEnricher::new(UNREACHABLE_CATALOG),
            Logger::console(true),
        );
        state.sessions = self.sessions.clone();
        state.streams = self.streams.clone();
        state
    }

    pub async fn login(&self, user_id: &str, user_type: UserType) -> String {
        self.sessions.create(Session::new(user_id, user_type)).await
    }

    /// Store `count` user messages from today in a chat of `user_id`
    pub async fn seed_user_messages(&self, user_id: &str, count: usize) {
        let chat_id = format!("seed-{}", user_id);
        self.store
            .save_chat(&chatbot::store::Chat::new(
                &chat_id,
                user_id,
                "Earlier",
                chatbot::store::Visibility::Private,
            ))
            .await
            .unwrap();
        let messages: Vec<DbMessage> = (0..count)
            .map(|i| {
                DbMessage::from_message(&chat_id, &Message::user().with_text(format!("msg {}", i)))
            })
            .collect();
        self.store.save_messages(&messages).await.unwrap();
    }

    /// Run a request through the routes, without the middleware
    pub async fn oneshot(&self, request: Request<Body>) -> Response {
        super::configure(self.state()).oneshot(request).await.unwrap()
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        self.oneshot(builder.body(body).unwrap()).await
    }

    pub async fn post_chat(&self, token: &str, body: Value) -> Response {
        self.send(Method::POST, "/api/chat", Some(token), Some(body))
            .await
    }
}

pub fn chat_request(id: &str, text: &str, model: &str) -> Value {
    json!({
        "id": id,
        "message": {
            "id": uuid::Uuid::new_v4().to_string(),
            "role": "user",
            "parts": [{"type": "text", "text": text}],
        },
        "selectedChatModel": model,
        "selectedVisibilityType": "private",
    })
}

pub async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Split a data stream body into (prefix, payload) pairs
pub fn data_lines(body: &str) -> Vec<(String, Value)> {
    body.lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (prefix, payload) = line.split_once(':').unwrap();
            (prefix.to_string(), serde_json::from_str(payload).unwrap())
        })
        .collect()
}
