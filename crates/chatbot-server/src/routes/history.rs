use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chatbot::store::ChatPage;
use serde::Deserialize;

use super::require_session;
use crate::error::{ChatError, ErrorType, Surface};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    starting_after: Option<String>,
    ending_before: Option<String>,
}

async fn list_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ChatPage>, ChatError> {
    if params.starting_after.is_some() && params.ending_before.is_some() {
        return Err(ChatError::new(ErrorType::BadRequest, Surface::Api)
            .with_cause("Only one of starting_after or ending_before can be provided."));
    }
    let session = require_session(&state, &headers, Surface::Chat).await?;

    let page = state
        .store
        .list_chats(
            &session.user_id,
            params.limit.unwrap_or(DEFAULT_LIMIT),
            params.starting_after.as_deref(),
            params.ending_before.as_deref(),
        )
        .await?;
    Ok(Json(page))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/history", get(list_history))
        .with_state(state)
}
