use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use chatbot::{
    agent::{Agent, ReplyEvent},
    models::{
        message::{Attachment, Message},
        role::Role,
        session::Session,
    },
    prompt_template::{system_prompt, title_prompt, RequestHints},
    providers::{base::Provider, registry::ChatModel, utils::BillingError},
    store::{Chat, DbMessage, Visibility},
    stream::{encode, message_events, DataPart, DataStreamWriter, StreamEvent},
    tools::{ToolContext, ToolKind},
};
use chrono::{Duration, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;
use uuid::Uuid;

use super::{data_stream_response, require_session};
use crate::error::{ChatError, ErrorType, Surface, ACTIVATE_GATEWAY_MESSAGE};
use crate::middleware::RequestId;
use crate::state::AppState;

const MAX_TEXT_LENGTH: usize = 2000;
const MAX_FILE_NAME_LENGTH: usize = 100;
const ALLOWED_MEDIA_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
const TITLE_FALLBACK_LENGTH: usize = 80;
/// An assistant message younger than this is replayed to a client resuming a finished stream
const RESUME_GRACE_SECS: i64 = 15;
const GENERIC_STREAM_ERROR: &str = "Oops, an error occurred!";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRequestBody {
    pub id: String,
    pub message: IncomingMessage,
    pub selected_chat_model: ChatModel,
    pub selected_visibility_type: Visibility,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub role: IncomingRole,
    pub parts: Vec<IncomingPart>,
}

/// Clients may only send user messages
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomingRole {
    User,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IncomingPart {
    Text {
        text: String,
    },
    File {
        #[serde(rename = "mediaType")]
        media_type: String,
        name: String,
        url: String,
    },
}

impl PostRequestBody {
    fn validate(&self) -> Result<(), String> {
        Uuid::parse_str(&self.id).map_err(|_| "id must be a uuid".to_string())?;
        Uuid::parse_str(&self.message.id).map_err(|_| "message.id must be a uuid".to_string())?;

        if !matches!(
            self.selected_chat_model,
            ChatModel::Chat | ChatModel::ChatReasoning
        ) {
            return Err(format!(
                "{} cannot be selected for chat",
                self.selected_chat_model
            ));
        }

        if self.message.parts.is_empty() {
            return Err("message has no parts".to_string());
        }
        for part in &self.message.parts {
            match part {
                IncomingPart::Text { text } => {
                    let length = text.chars().count();
                    if length == 0 || length > MAX_TEXT_LENGTH {
                        return Err(format!(
                            "text must be between 1 and {} characters",
                            MAX_TEXT_LENGTH
                        ));
                    }
                }
                IncomingPart::File {
                    media_type,
                    name,
                    url,
                } => {
                    if !ALLOWED_MEDIA_TYPES.contains(&media_type.as_str()) {
                        return Err(format!("unsupported media type {}", media_type));
                    }
                    if name.is_empty() || name.chars().count() > MAX_FILE_NAME_LENGTH {
                        return Err("invalid file name".to_string());
                    }
                    Url::parse(url).map_err(|e| format!("invalid file url: {}", e))?;
                }
            }
        }
        Ok(())
    }

    fn to_message(&self) -> Message {
        self.message
            .parts
            .iter()
            .fold(Message::user().with_id(&self.message.id), |message, part| {
                match part {
                    IncomingPart::Text { text } => message.with_text(text),
                    IncomingPart::File {
                        media_type,
                        name,
                        url,
                    } => message.with_attachment(Attachment {
                        url: url.clone(),
                        name: name.clone(),
                        content_type: media_type.clone(),
                    }),
                }
            })
    }
}

fn parse_body(body: &[u8]) -> Result<PostRequestBody, ChatError> {
    let request: PostRequestBody = serde_json::from_slice(body)
        .map_err(|e| ChatError::new(ErrorType::BadRequest, Surface::Api).with_cause(e.to_string()))?;
    request
        .validate()
        .map_err(|cause| ChatError::new(ErrorType::BadRequest, Surface::Api).with_cause(cause))?;
    Ok(request)
}

/// Location hints the edge attaches to requests
fn request_hints(headers: &HeaderMap) -> RequestHints {
    let hint = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                urlencoding::decode(value)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| value.to_string())
            })
            .filter(|value| !value.is_empty())
    };

    let defaults = RequestHints::default();
    RequestHints {
        latitude: hint("x-vercel-ip-latitude").unwrap_or(defaults.latitude),
        longitude: hint("x-vercel-ip-longitude").unwrap_or(defaults.longitude),
        city: hint("x-vercel-ip-city").unwrap_or(defaults.city),
        country: hint("x-vercel-ip-country").unwrap_or(defaults.country),
    }
}

fn fallback_title(message: &Message) -> String {
    let title: String = message
        .text()
        .trim()
        .chars()
        .take(TITLE_FALLBACK_LENGTH)
        .collect();
    if title.is_empty() {
        "New chat".to_string()
    } else {
        title
    }
}

/// Ask the title model to name a conversation after its first message
async fn generate_title(state: &AppState, message: &Message) -> anyhow::Result<String> {
    let provider = state.registry.language_model(ChatModel::Title)?;
    let (response, _) = provider
        .complete(title_prompt(), std::slice::from_ref(message), &[])
        .await?;

    let title = response.text().trim().trim_matches('"').trim().to_string();
    if title.is_empty() {
        Ok(fallback_title(message))
    } else {
        Ok(title)
    }
}

/// Turn a failure into the client response: domain errors as they are, billing rejections
/// as `activate_gateway`, anything else logged and reported as `offline`.
pub(crate) fn error_response(state: &AppState, err: anyhow::Error) -> Response {
    if let Some(chat_error) = err.downcast_ref::<ChatError>() {
        return chat_error.clone().into_response();
    }
    if err.downcast_ref::<BillingError>().is_some() {
        return ChatError::new(ErrorType::BadRequest, Surface::ActivateGateway).into_response();
    }

    state.logger.error(
        "Unhandled error in chat API",
        json!({ "error": format!("{:#}", err) }),
    );
    ChatError::new(ErrorType::Offline, Surface::Chat).into_response()
}

/// One model turn, run detached from the request so it finishes even if the client leaves
struct Turn {
    state: AppState,
    session: Session,
    chat_id: String,
    model: ChatModel,
    provider: Arc<dyn Provider>,
    system: String,
    history: Vec<Message>,
}

impl Turn {
    async fn run(self, writer: DataStreamWriter) {
        let mut agent = Agent::new(self.provider.clone());
        if !self.model.is_reasoning() {
            let context = ToolContext::new(
                self.session.clone(),
                writer.clone(),
                self.state.store.clone(),
                self.state.registry.clone(),
            )
            .with_weather_host(self.state.weather_host.clone());
            agent = agent.with_tools(ToolKind::all(), context);
        }

        let mut produced: Vec<Message> = Vec::new();
        let mut usage = None;
        let mut failure = None;
        {
            let mut replies = agent.reply(&self.system, &self.history);
            while let Some(event) = replies.next().await {
                match event {
                    Ok(ReplyEvent::Message(message)) => {
                        for event in message_events(&message) {
                            writer.write(event);
                        }
                        produced.push(message);
                    }
                    Ok(ReplyEvent::Usage(total)) => usage = Some(total),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        if let Some(err) = &failure {
            self.state.logger.error(
                "chat turn failed",
                json!({ "chatId": self.chat_id, "error": format!("{:#}", err) }),
            );
            let message = if err.downcast_ref::<BillingError>().is_some() {
                ACTIVATE_GATEWAY_MESSAGE
            } else {
                GENERIC_STREAM_ERROR
            };
            writer.write(StreamEvent::Error(message.to_string()));
        }

        let enriched = match usage {
            Some(usage) => {
                let enriched = self
                    .state
                    .enricher
                    .enrich(&usage, self.provider.model_id())
                    .await;
                writer.write_data(DataPart::Usage(enriched.clone()));

                let finish_reason = match produced.last() {
                    Some(message) if message.role == Role::Tool => "tool-calls",
                    _ => "stop",
                };
                writer.write(StreamEvent::Finish {
                    finish_reason: finish_reason.to_string(),
                    usage,
                });
                Some(enriched)
            }
            None => None,
        };

        // whatever was generated is kept, even when the turn failed part way
        let records: Vec<DbMessage> = produced
            .iter()
            .map(|message| DbMessage::from_message(&self.chat_id, message))
            .collect();
        if !records.is_empty() {
            if let Err(e) = self.state.store.save_messages(&records).await {
                self.state.logger.error(
                    "failed to persist assistant messages",
                    json!({ "chatId": self.chat_id, "error": e.to_string() }),
                );
            }
        }

        if let Some(enriched) = enriched {
            if let Err(e) = self
                .state
                .store
                .update_chat_last_context(&self.chat_id, &enriched)
                .await
            {
                self.state.logger.warn(
                    "Unable to persist last usage for chat",
                    json!({ "chatId": self.chat_id, "error": e.to_string() }),
                );
            }
        }
    }
}

async fn handle_post(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    request_id: Option<&str>,
) -> anyhow::Result<Response> {
    let request = parse_body(body)?;
    let session = require_session(state, headers, Surface::Chat).await?;

    let since = Utc::now() - Duration::hours(24);
    let message_count = state
        .store
        .count_user_messages_since(&session.user_id, since)
        .await
        .map_err(ChatError::from)?;
    if message_count > state.entitlements.max_messages_per_day(session.user_type) {
        return Err(ChatError::new(ErrorType::RateLimit, Surface::Chat).into());
    }

    let user_message = request.to_message();
    match state
        .store
        .get_chat(&request.id)
        .await
        .map_err(ChatError::from)?
    {
        Some(chat) => {
            if chat.user_id != session.user_id {
                return Err(ChatError::new(ErrorType::Forbidden, Surface::Chat).into());
            }
        }
        None => {
            let title = generate_title(state, &user_message).await?;
            let chat = Chat::new(
                &request.id,
                &session.user_id,
                title,
                request.selected_visibility_type,
            );
            state.store.save_chat(&chat).await.map_err(ChatError::from)?;
        }
    }

    let mut history: Vec<Message> = state
        .store
        .get_messages(&request.id)
        .await
        .map_err(ChatError::from)?
        .iter()
        .map(DbMessage::to_message)
        .collect();

    state
        .store
        .save_messages(&[DbMessage::from_message(&request.id, &user_message)])
        .await
        .map_err(ChatError::from)?;
    history.push(user_message);

    let stream_id = Uuid::new_v4().to_string();
    state
        .store
        .save_stream_id(&stream_id, &request.id)
        .await
        .map_err(ChatError::from)?;

    let model = request.selected_chat_model;
    let provider = state.registry.language_model(model)?;
    let system = system_prompt(model, &request_hints(headers))?;

    state.logger.info(
        "starting chat turn",
        json!({
            "requestId": request_id,
            "chatId": request.id,
            "streamId": stream_id,
            "model": model.to_string(),
            "historyLength": history.len(),
        }),
    );

    let turn = Turn {
        state: state.clone(),
        session,
        chat_id: request.id.clone(),
        model,
        provider,
        system,
        history,
    };
    let (writer, rx) = DataStreamWriter::channel();
    tokio::spawn(turn.run(writer));

    let lines = UnboundedReceiverStream::new(rx).map(|event| encode(&event));
    let body: BoxStream<'static, String> = match &state.streams {
        Some(hub) => {
            let publisher = hub.create(&stream_id);
            let subscriber = hub.subscribe(&stream_id);
            tokio::spawn(async move {
                let mut lines = lines;
                while let Some(line) = lines.next().await {
                    publisher.push(line);
                }
            });
            subscriber.unwrap_or_else(|| stream::empty().boxed())
        }
        None => lines.boxed(),
    };

    Ok(data_stream_response(body))
}

async fn create_chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> Response {
    let request_id = request_id.map(|Extension(RequestId(id))| id);
    match handle_post(&state, &headers, &body, request_id.as_deref()).await {
        Ok(response) => response,
        Err(err) => error_response(&state, err),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: Option<String>,
}

async fn delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Chat>, ChatError> {
    let id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ChatError::new(ErrorType::BadRequest, Surface::Api))?;
    let session = require_session(&state, &headers, Surface::Chat).await?;

    let chat = state.store.get_chat(&id).await?;
    match chat {
        Some(chat) if chat.user_id == session.user_id => {}
        _ => return Err(ChatError::new(ErrorType::Forbidden, Surface::Chat)),
    }

    // a concurrent delete may have won; it never counts as a second success
    let deleted = state
        .store
        .delete_chat(&id)
        .await?
        .ok_or_else(|| ChatError::new(ErrorType::Forbidden, Surface::Chat))?;
    Ok(Json(deleted))
}

async fn resume_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> Result<Response, ChatError> {
    let Some(hub) = state.streams.clone() else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let session = require_session(&state, &headers, Surface::Chat).await?;

    let chat = state
        .store
        .get_chat(&chat_id)
        .await?
        .ok_or_else(|| ChatError::new(ErrorType::NotFound, Surface::Chat))?;
    if chat.visibility == Visibility::Private && chat.user_id != session.user_id {
        return Err(ChatError::new(ErrorType::Forbidden, Surface::Chat));
    }

    let stream_ids = state.store.get_stream_ids(&chat_id).await?;
    let recent_stream_id = stream_ids
        .last()
        .ok_or_else(|| ChatError::new(ErrorType::NotFound, Surface::Stream))?;

    if let Some(lines) = hub.subscribe(recent_stream_id) {
        return Ok(data_stream_response(lines));
    }

    // the stream is gone; a message that only just finished is sent in one piece
    let messages = state.store.get_messages(&chat_id).await?;
    let replay = match messages.last() {
        Some(last)
            if last.role == Role::Assistant
                && Utc::now() - last.created_at <= Duration::seconds(RESUME_GRACE_SECS) =>
        {
            let serialized = serde_json::to_string(last)
                .map_err(|e| ChatError::from(chatbot::store::StoreError::from(e)))?;
            vec![encode(&StreamEvent::Data(DataPart::AppendMessage(serialized)))]
        }
        _ => Vec::new(),
    };

    Ok(data_stream_response(stream::iter(replay).boxed()))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(create_chat_message).delete(delete_chat))
        .route("/api/chat/:id/stream", get(resume_stream))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{
        body_json, body_text, chat_request, data_lines, TestApp, OTHER_USER, USER,
    };
    use axum::http::{Method, Request};
    use chatbot::models::session::UserType;
    use chatbot::models::tool::ToolCall;
    use chatbot::providers::mock::{MockFailure, MockProvider};
    use chatbot::store::ChatStore;
    use serde_json::Value;

    const CHAT_ID: &str = "5f0c8a4e-2b1d-4c3e-9f6a-7d8e9a0b1c2d";

    #[tokio::test]
    async fn test_first_message_creates_titled_chat_and_streams() {
        let app = TestApp::new(
            MockProvider::new(vec![Message::assistant().with_text("Hi there, friend")])
                .with_usage(chatbot::providers::base::Usage::new(Some(10), Some(4), Some(14))),
        )
        .with_title("Greeting the assistant");
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "Hello!", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["x-vercel-ai-data-stream"],
            "v1"
        );
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = body_text(response).await;
        let lines = data_lines(&body);
        assert!(lines.iter().any(|(prefix, _)| prefix == "0"));
        let usage_part = lines
            .iter()
            .filter(|(prefix, _)| prefix == "2")
            .flat_map(|(_, value)| value.as_array().cloned().unwrap_or_default())
            .find(|part| part["type"] == "data-usage")
            .expect("usage part");
        assert_eq!(usage_part["data"]["inputTokens"], 10);
        assert_eq!(lines.last().map(|(p, _)| p.as_str()), Some("d"));

        // the body only ends once the turn is stored
        let chat = app.store.get_chat(CHAT_ID).await.unwrap().unwrap();
        assert_eq!(chat.title, "Greeting the assistant");
        assert_eq!(chat.user_id, USER);
        assert!(chat.last_context.is_some());

        let messages = app.store.get_messages(CHAT_ID).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].to_message().text(), "Hello!");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].to_message().text(), "Hi there, friend");
    }

    #[tokio::test]
    async fn test_history_is_replayed_in_order() {
        let app = TestApp::new(MockProvider::new(vec![
            Message::assistant().with_text("first answer"),
            Message::assistant().with_text("second answer"),
        ]));
        let token = app.login(USER, UserType::Regular).await;

        for text in ["one", "two"] {
            let response = app
                .post_chat(&token, chat_request(CHAT_ID, text, "chat-model"))
                .await;
            body_text(response).await;
        }

        let calls = app.chat_provider.calls();
        assert_eq!(calls.len(), 2);
        let texts: Vec<String> = calls[1].messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["one", "first answer", "two"]);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_before_persisting() {
        let app = TestApp::new(MockProvider::new(vec![]));
        let token = app.login(USER, UserType::Guest).await;
        app.seed_user_messages(USER, 24).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "25th", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["code"], "rate_limit:chat");

        assert!(app.store.get_chat(CHAT_ID).await.unwrap().is_none());
        assert!(app.chat_provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        let app = TestApp::new(MockProvider::new(vec![
            Message::assistant().with_text("still within today's allowance"),
        ]));
        let token = app.login(USER, UserType::Guest).await;
        // a guest may send 20 messages a day; with exactly 20 stored the request still runs
        app.seed_user_messages(USER, 20).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "at the limit", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        body_text(response).await;

        // that request made it 21
        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "over the limit", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["code"], "rate_limit:chat");
        assert_eq!(app.chat_provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reasoning_model_gets_no_tools() {
        let app = TestApp::new(MockProvider::new(vec![]));
        let reasoning = Arc::new(MockProvider::new(vec![Message::assistant()
            .with_reasoning("thinking about weather")
            .with_text("It is probably sunny.")
            .with_tool_request(
                "call_1",
                Ok(ToolCall::new(
                    "getWeather",
                    json!({"latitude": 1.0, "longitude": 2.0}),
                )),
            )]));
        let app = app.with_provider(ChatModel::ChatReasoning, reasoning.clone());
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(
                &token,
                chat_request(CHAT_ID, "What's the weather?", "chat-model-reasoning"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        let lines = data_lines(&body);

        assert!(lines.iter().all(|(prefix, _)| prefix != "9" && prefix != "a"));
        assert!(lines.iter().any(|(prefix, _)| prefix == "g"));
        assert!(reasoning.calls()[0].tools.is_empty());
        assert!(!reasoning.calls()[0].system.contains("createDocument"));
    }

    #[tokio::test]
    async fn test_tool_calls_are_streamed() {
        let app = TestApp::new(MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new(
                    "updateDocument",
                    json!({"id": "missing", "description": "shorter"}),
                )),
            ),
            Message::assistant().with_text("No such document."),
        ]));
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "shorten it", "chat-model"))
            .await;
        let body = body_text(response).await;
        let lines = data_lines(&body);

        let call = lines.iter().find(|(p, _)| p == "9").expect("tool call");
        assert_eq!(call.1["toolName"], "updateDocument");
        let result = lines.iter().find(|(p, _)| p == "a").expect("tool result");
        assert_eq!(result.1["result"]["error"], "Document not found");

        // assistant call, tool result and final answer follow the user message
        assert_eq!(app.store.get_messages(CHAT_ID).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_model_failure_keeps_user_message() {
        let app = TestApp::new(MockProvider::from_results(vec![Err(MockFailure::Other(
            "upstream exploded".to_string(),
        ))]));
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "Hello?", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        let lines = data_lines(&body);
        let error = lines.iter().find(|(p, _)| p == "3").expect("error line");
        assert_eq!(error.1, Value::String(GENERIC_STREAM_ERROR.to_string()));

        let messages = app.store.get_messages(CHAT_ID).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_billing_failure_on_title_is_activate_gateway() {
        let app = TestApp::new(MockProvider::new(vec![])).with_provider(
            ChatModel::Title,
            Arc::new(MockProvider::from_results(vec![Err(MockFailure::Billing)])),
        );
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "Hello", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "bad_request:activate_gateway");
        assert_eq!(body["message"], ACTIVATE_GATEWAY_MESSAGE);
    }

    #[tokio::test]
    async fn test_unclassified_failure_is_offline() {
        // nothing serves the title model
        let app = TestApp::new(MockProvider::new(vec![])).without_provider(ChatModel::Title);
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "Hello", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["code"], "offline:chat");
    }

    #[tokio::test]
    async fn test_rejects_malformed_and_unauthenticated_requests() {
        let app = TestApp::new(MockProvider::new(vec![]));
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request("not-a-uuid", "Hello", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "bad_request:api");

        let too_long = "x".repeat(MAX_TEXT_LENGTH + 1);
        let response = app
            .post_chat(&token, chat_request(CHAT_ID, &too_long, "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "Hello", "title-model"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .post_chat("bogus-token", chat_request(CHAT_ID, "Hello", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "unauthorized:chat");
    }

    #[tokio::test]
    async fn test_posting_to_someone_elses_chat_is_forbidden() {
        let app = TestApp::new(MockProvider::new(vec![]));
        app.store
            .save_chat(&Chat::new(CHAT_ID, OTHER_USER, "Theirs", Visibility::Private))
            .await
            .unwrap();
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "Hello", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["code"], "forbidden:chat");
        assert!(app.store.get_messages(CHAT_ID).await.unwrap().is_empty());
        assert!(app.store.get_stream_ids(CHAT_ID).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_chat() {
        let app = TestApp::new(MockProvider::new(vec![]));
        let chat = Chat::new(CHAT_ID, USER, "Mine", Visibility::Private);
        app.store.save_chat(&chat).await.unwrap();
        let token = app.login(USER, UserType::Regular).await;

        let uri = format!("/api/chat?id={}", CHAT_ID);
        let response = app.send(Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], CHAT_ID);
        assert_eq!(body["title"], "Mine");
        assert!(app.store.get_chat(CHAT_ID).await.unwrap().is_none());

        // never a second success
        let response = app.send(Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_delete_someone_elses_chat_is_forbidden() {
        let app = TestApp::new(MockProvider::new(vec![]));
        app.store
            .save_chat(&Chat::new(CHAT_ID, OTHER_USER, "Theirs", Visibility::Private))
            .await
            .unwrap();
        app.store
            .save_messages(&[DbMessage::from_message(
                CHAT_ID,
                &Message::user().with_text("keep me"),
            )])
            .await
            .unwrap();
        let token = app.login(USER, UserType::Regular).await;

        let uri = format!("/api/chat?id={}", CHAT_ID);
        let response = app.send(Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["code"], "forbidden:chat");

        assert!(app.store.get_chat(CHAT_ID).await.unwrap().is_some());
        assert_eq!(app.store.get_messages(CHAT_ID).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_needs_id_and_session() {
        let app = TestApp::new(MockProvider::new(vec![]));
        let token = app.login(USER, UserType::Regular).await;

        let response = app.send(Method::DELETE, "/api/chat", Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "bad_request:api");

        let uri = format!("/api/chat?id={}", CHAT_ID);
        let response = app.send(Method::DELETE, &uri, None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_resume_replays_hub_stream() {
        let app = TestApp::new(MockProvider::new(vec![
            Message::assistant().with_text("Resumable answer"),
        ]))
        .with_streams();
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "Hello", "chat-model"))
            .await;
        let original = body_text(response).await;

        let uri = format!("/api/chat/{}/stream", CHAT_ID);
        let response = app.send(Method::GET, &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, original);
    }

    #[tokio::test]
    async fn test_long_answer_reaches_slow_client_through_hub() {
        let answer: String = (0..3000).map(|i| format!("word{} ", i)).collect();
        let app = TestApp::new(MockProvider::new(vec![
            Message::assistant().with_text(answer.trim_end()),
        ]))
        .with_streams();
        let token = app.login(USER, UserType::Regular).await;

        let response = app
            .post_chat(&token, chat_request(CHAT_ID, "Write a lot", "chat-model"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut chunks = response.into_body().into_data_stream();
        let mut body = Vec::new();
        let mut read = 0;
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk.unwrap());
            read += 1;
            if read % 50 == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        }
        let body = String::from_utf8(body).unwrap();

        let lines = data_lines(&body);
        let text: String = lines
            .iter()
            .filter(|(prefix, _)| prefix == "0")
            .filter_map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(text, answer.trim_end());
        assert_eq!(lines.last().map(|(p, _)| p.as_str()), Some("d"));
    }

    #[tokio::test]
    async fn test_resume_falls_back_to_recent_message() {
        let app = TestApp::new(MockProvider::new(vec![])).with_streams();
        app.store
            .save_chat(&Chat::new(CHAT_ID, USER, "Mine", Visibility::Private))
            .await
            .unwrap();
        // a stream this process never saw, e.g. from before a restart
        app.store.save_stream_id("old-stream", CHAT_ID).await.unwrap();
        app.store
            .save_messages(&[DbMessage::from_message(
                CHAT_ID,
                &Message::assistant().with_text("just finished"),
            )])
            .await
            .unwrap();
        let token = app.login(USER, UserType::Regular).await;

        let uri = format!("/api/chat/{}/stream", CHAT_ID);
        let response = app.send(Method::GET, &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        let lines = data_lines(&body);
        assert_eq!(lines.len(), 1);
        let part = &lines[0].1[0];
        assert_eq!(part["type"], "data-appendMessage");
        let message: Value = serde_json::from_str(part["data"].as_str().unwrap()).unwrap();
        assert_eq!(message["role"], "assistant");
    }

    #[tokio::test]
    async fn test_resume_checks_access() {
        let app = TestApp::new(MockProvider::new(vec![])).with_streams();
        app.store
            .save_chat(&Chat::new(CHAT_ID, OTHER_USER, "Theirs", Visibility::Private))
            .await
            .unwrap();
        let token = app.login(USER, UserType::Regular).await;

        let uri = format!("/api/chat/{}/stream", CHAT_ID);
        let response = app.send(Method::GET, &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .send(Method::GET, "/api/chat/unknown/stream", Some(&token), None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "not_found:chat");

        app.store
            .save_chat(&Chat::new("mine", USER, "Mine", Visibility::Private))
            .await
            .unwrap();
        let response = app
            .send(Method::GET, "/api/chat/mine/stream", Some(&token), None)
            .await;
        assert_eq!(body_json(response).await["code"], "not_found:stream");
    }

    #[tokio::test]
    async fn test_resume_without_hub_is_no_content() {
        let app = TestApp::new(MockProvider::new(vec![]));
        let token = app.login(USER, UserType::Regular).await;
        let request = Request::builder()
            .uri(format!("/api/chat/{}/stream", CHAT_ID))
            .header("authorization", format!("Bearer {}", token))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_request_hints_are_decoded() {
        let mut headers = HeaderMap::new();
        headers.insert("x-vercel-ip-city", "S%C3%A3o%20Paulo".parse().unwrap());
        headers.insert("x-vercel-ip-latitude", "-23.55".parse().unwrap());

        let hints = request_hints(&headers);
        assert_eq!(hints.city, "São Paulo");
        assert_eq!(hints.latitude, "-23.55");
        assert_eq!(hints.country, "unknown");
    }
}
