use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::ToolContext;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::prompt_template::{create_document_prompt, update_document_prompt};
use crate::providers::registry::ChatModel;
use crate::store::{Document, DocumentKind};
use crate::stream::{smooth_words, DataPart};

#[derive(Debug, Deserialize)]
pub struct CreateDocumentArgs {
    pub title: String,
    pub kind: DocumentKind,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDocumentArgs {
    pub id: String,
    pub description: String,
}

/// Ask the artifact model for document content and stream it to the client as it is shown
pub(crate) async fn generate(ctx: &ToolContext, system: &str, prompt: &str) -> AgentResult<String> {
    let provider = ctx
        .registry
        .language_model(ChatModel::Artifact)
        .map_err(|e| AgentError::Internal(e.to_string()))?;
    let (message, _) = provider
        .complete(system, &[Message::user().with_text(prompt)], &[])
        .await
        .map_err(|e| AgentError::ExecutionError(e.to_string()))?;
    Ok(message.text())
}

fn stream_content(ctx: &ToolContext, content: &str) {
    for delta in smooth_words(content) {
        ctx.writer.write_data(DataPart::TextDelta(delta));
    }
}

fn store_error(e: crate::store::StoreError) -> AgentError {
    AgentError::ExecutionError(e.to_string())
}

pub async fn create_document(ctx: &ToolContext, args: CreateDocumentArgs) -> AgentResult<Value> {
    let id = Uuid::new_v4().to_string();

    ctx.writer.write_data(DataPart::Kind(args.kind.to_string()));
    ctx.writer.write_data(DataPart::Id(id.clone()));
    ctx.writer.write_data(DataPart::Title(args.title.clone()));
    ctx.writer.write_data(DataPart::Clear);

    let system = create_document_prompt(args.kind).map_err(|e| AgentError::Internal(e.to_string()))?;
    let content = generate(ctx, &system, &args.title).await?;
    stream_content(ctx, &content);

    ctx.store
        .save_document(&Document {
            id: id.clone(),
            user_id: ctx.session.user_id.clone(),
            title: args.title.clone(),
            kind: args.kind,
            content,
            created_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;

    ctx.writer.write_data(DataPart::Finish);

    Ok(json!({
        "id": id,
        "title": args.title,
        "kind": args.kind,
        "content": "A document was created and is now visible to the user.",
    }))
}

pub async fn update_document(ctx: &ToolContext, args: UpdateDocumentArgs) -> AgentResult<Value> {
    let existing = ctx.store.get_document(&args.id).await.map_err(store_error)?;
    let Some(document) = existing.filter(|d| d.user_id == ctx.session.user_id) else {
        return Ok(json!({"error": "Document not found"}));
    };

    ctx.writer.write_data(DataPart::Clear);

    let system = update_document_prompt(document.kind, &document.content)
        .map_err(|e| AgentError::Internal(e.to_string()))?;
    let content = generate(ctx, &system, &args.description).await?;
    stream_content(ctx, &content);

    ctx.store
        .save_document(&Document {
            content,
            created_at: Utc::now(),
            ..document.clone()
        })
        .await
        .map_err(store_error)?;

    ctx.writer.write_data(DataPart::Finish);

    Ok(json!({
        "id": document.id,
        "title": document.title,
        "kind": document.kind,
        "content": "The document has been updated successfully.",
    }))
}
