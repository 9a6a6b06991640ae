use serde::Serialize;
use serde_json::json;
use tera::{Context, Error as TeraError, Tera};

use crate::providers::registry::ChatModel;
use crate::store::DocumentKind;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TITLE_PROMPT: &str = include_str!("prompts/title.md");
const CREATE_DOCUMENT_TEMPLATE: &str = include_str!("prompts/create_document.md");
const UPDATE_DOCUMENT_TEMPLATE: &str = include_str!("prompts/update_document.md");
const SUGGESTIONS_PROMPT: &str = include_str!("prompts/suggestions.md");

/// Render a markdown prompt template with the given values
pub fn load_prompt<T: Serialize>(template: &str, values: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("prompt", template)?;
    tera.render("prompt", &Context::from_serialize(values)?)
}

/// Where the request came from, as reported by the edge in `x-vercel-ip-*` headers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestHints {
    pub latitude: String,
    pub longitude: String,
    pub city: String,
    pub country: String,
}

impl Default for RequestHints {
    fn default() -> Self {
        let unknown = || "unknown".to_string();
        Self {
            latitude: unknown(),
            longitude: unknown(),
            city: unknown(),
            country: unknown(),
        }
    }
}

/// The chat system prompt. The reasoning model gets no artifact instructions since it has no
/// tools to act on them.
pub fn system_prompt(model: ChatModel, hints: &RequestHints) -> Result<String, TeraError> {
    load_prompt(
        SYSTEM_TEMPLATE,
        &json!({
            "hints": hints,
            "artifacts": !model.is_reasoning(),
        }),
    )
}

pub fn title_prompt() -> &'static str {
    TITLE_PROMPT
}

pub fn create_document_prompt(kind: DocumentKind) -> Result<String, TeraError> {
    load_prompt(CREATE_DOCUMENT_TEMPLATE, &json!({ "kind": kind }))
}

pub fn update_document_prompt(kind: DocumentKind, content: &str) -> Result<String, TeraError> {
    load_prompt(
        UPDATE_DOCUMENT_TEMPLATE,
        &json!({ "kind": kind, "content": content }),
    )
}

pub fn suggestions_prompt() -> &'static str {
    SUGGESTIONS_PROMPT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fails_on_missing_variable() {
        let template = "You are chatting from {{ hints.city }}, {{ hints.country }}.";
        let rendered = load_prompt(template, &json!({ "hints": RequestHints::default() })).unwrap();
        assert_eq!(rendered, "You are chatting from unknown, unknown.");

        assert!(load_prompt(template, &json!({ "hints": {} })).is_err());
    }

    #[test]
    fn test_system_prompt_includes_hints() {
        let hints = RequestHints {
            latitude: "52.52".to_string(),
            longitude: "13.40".to_string(),
            city: "Berlin".to_string(),
            country: "DE".to_string(),
        };
        let prompt = system_prompt(ChatModel::Chat, &hints).unwrap();
        assert!(prompt.contains("- city: Berlin"));
        assert!(prompt.contains("- lat: 52.52"));
        assert!(prompt.contains("createDocument"));
    }

    #[test]
    fn test_reasoning_prompt_has_no_artifacts() {
        let prompt = system_prompt(ChatModel::ChatReasoning, &RequestHints::default()).unwrap();
        assert!(prompt.contains("- country: unknown"));
        assert!(!prompt.contains("createDocument"));
    }

    #[test]
    fn test_document_prompts_follow_kind() {
        assert!(create_document_prompt(DocumentKind::Code)
            .unwrap()
            .contains("code generator"));
        assert!(create_document_prompt(DocumentKind::Sheet)
            .unwrap()
            .contains("csv"));
        let update = update_document_prompt(DocumentKind::Text, "Old text").unwrap();
        assert!(update.contains("Improve the following contents"));
        assert!(update.trim_end().ends_with("Old text"));
    }
}
