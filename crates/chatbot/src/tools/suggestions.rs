use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::documents::generate;
use super::ToolContext;
use crate::errors::{AgentError, AgentResult};
use crate::prompt_template::suggestions_prompt;
use crate::store::Suggestion;
use crate::stream::DataPart;

const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSuggestionsArgs {
    pub document_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposedEdit {
    original_sentence: String,
    suggested_sentence: String,
    #[serde(default)]
    description: Option<String>,
}

/// Pull the JSON array out of a model reply that may wrap it in prose or a code fence
fn parse_edits(reply: &str) -> AgentResult<Vec<ProposedEdit>> {
    let start = reply.find('[');
    let end = reply.rfind(']');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(AgentError::ExecutionError(
            "model did not return a list of suggestions".to_string(),
        ));
    };
    if end < start {
        return Err(AgentError::ExecutionError(
            "model did not return a list of suggestions".to_string(),
        ));
    }
    serde_json::from_str(&reply[start..=end])
        .map_err(|e| AgentError::ExecutionError(format!("invalid suggestions: {}", e)))
}

pub async fn request_suggestions(
    ctx: &ToolContext,
    args: RequestSuggestionsArgs,
) -> AgentResult<Value> {
    let document = ctx
        .store
        .get_document(&args.document_id)
        .await
        .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
    let Some(document) = document.filter(|d| d.user_id == ctx.session.user_id) else {
        return Ok(json!({"error": "Document not found"}));
    };

    let reply = generate(ctx, suggestions_prompt(), &document.content).await?;
    let edits = parse_edits(&reply)?;

    let mut suggestions = Vec::new();
    for edit in edits.into_iter().take(MAX_SUGGESTIONS) {
        let suggestion = Suggestion {
            id: Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            original_text: edit.original_sentence,
            suggested_text: edit.suggested_sentence,
            description: edit.description,
            is_resolved: false,
            user_id: ctx.session.user_id.clone(),
            created_at: Utc::now(),
        };
        ctx.writer
            .write_data(DataPart::Suggestion(suggestion.clone()));
        suggestions.push(suggestion);
    }

    ctx.store
        .save_suggestions(&suggestions)
        .await
        .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

    Ok(json!({
        "id": document.id,
        "title": document.title,
        "kind": document.kind,
        "message": "Suggestions have been added to the document",
    }))
}
