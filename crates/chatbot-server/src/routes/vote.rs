use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chatbot::store::{Chat, Vote};
use serde::Deserialize;

use super::require_session;
use crate::error::{ChatError, ErrorType, Surface};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteParams {
    chat_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum VoteType {
    Up,
    Down,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    chat_id: String,
    message_id: String,
    #[serde(rename = "type")]
    kind: VoteType,
}

fn bad_request() -> ChatError {
    ChatError::new(ErrorType::BadRequest, Surface::Api)
}

fn check_owner(chat: Option<Chat>, user_id: &str, missing: Surface) -> Result<Chat, ChatError> {
    let chat = chat.ok_or_else(|| ChatError::new(ErrorType::NotFound, missing))?;
    if chat.user_id != user_id {
        return Err(ChatError::new(ErrorType::Forbidden, Surface::Vote));
    }
    Ok(chat)
}

async fn get_votes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<VoteParams>,
) -> Result<Json<Vec<Vote>>, ChatError> {
    let chat_id = params
        .chat_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| bad_request().with_cause("Parameter chatId is required."))?;
    let session = require_session(&state, &headers, Surface::Vote).await?;

    let chat = state.store.get_chat(&chat_id).await?;
    check_owner(chat, &session.user_id, Surface::Chat)?;

    Ok(Json(state.store.get_votes(&chat_id).await?))
}

async fn vote_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ChatError> {
    let request: VoteRequest = serde_json::from_slice(&body).map_err(|_| {
        bad_request().with_cause("Parameters chatId, messageId, and type are required.")
    })?;
    let session = require_session(&state, &headers, Surface::Vote).await?;

    let chat = state.store.get_chat(&request.chat_id).await?;
    check_owner(chat, &session.user_id, Surface::Vote)?;

    state
        .store
        .vote_message(&Vote {
            chat_id: request.chat_id,
            message_id: request.message_id,
            is_upvoted: matches!(request.kind, VoteType::Up),
        })
        .await?;
    Ok("Message voted")
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/vote", get(get_votes).patch(vote_message))
        .with_state(state)
}
