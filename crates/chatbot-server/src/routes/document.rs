use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chatbot::store::Document;
use serde::Deserialize;

use super::require_session;
use crate::error::{ChatError, ErrorType, Surface};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct DocumentParams {
    id: Option<String>,
}

/// Every version of a document, oldest first
async fn get_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DocumentParams>,
) -> Result<Json<Vec<Document>>, ChatError> {
    let id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ChatError::new(ErrorType::BadRequest, Surface::Api)
                .with_cause("Parameter id is missing")
        })?;
    let session = require_session(&state, &headers, Surface::Document).await?;

    let documents = state.store.get_documents(&id).await?;
    let first = documents
        .first()
        .ok_or_else(|| ChatError::new(ErrorType::NotFound, Surface::Document))?;
    if first.user_id != session.user_id {
        return Err(ChatError::new(ErrorType::Forbidden, Surface::Document));
    }

    Ok(Json(documents))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/document", get(get_document))
        .with_state(state)
}
