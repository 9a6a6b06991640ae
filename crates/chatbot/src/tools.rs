//! Tools the chat model may call. The set is closed: each [`ToolKind`] owns its schema and
//! its implementation, and arguments are decoded into typed structs before running.
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::errors::{AgentError, AgentResult};
use crate::models::session::Session;
use crate::models::tool::Tool;
use crate::providers::registry::ProviderRegistry;
use crate::store::ChatStore;
use crate::stream::DataStreamWriter;

pub mod documents;
pub mod suggestions;
pub mod weather;

pub const DEFAULT_WEATHER_HOST: &str = "https://api.open-meteo.com";

/// What a tool invocation may touch: the caller, the turn's output stream and shared services
#[derive(Clone)]
pub struct ToolContext {
    pub session: Session,
    pub writer: DataStreamWriter,
    pub store: Arc<dyn ChatStore>,
    pub registry: Arc<ProviderRegistry>,
    pub http: Client,
    pub weather_host: String,
}

impl ToolContext {
    pub fn new(
        session: Session,
        writer: DataStreamWriter,
        store: Arc<dyn ChatStore>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            session,
            writer,
            store,
            registry,
            http: Client::new(),
            weather_host: DEFAULT_WEATHER_HOST.to_string(),
        }
    }

    pub fn with_weather_host(mut self, host: impl Into<String>) -> Self {
        self.weather_host = host.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum ToolKind {
    GetWeather,
    CreateDocument,
    UpdateDocument,
    RequestSuggestions,
}

impl ToolKind {
    pub fn all() -> Vec<ToolKind> {
        ToolKind::iter().collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::GetWeather => "getWeather",
            ToolKind::CreateDocument => "createDocument",
            ToolKind::UpdateDocument => "updateDocument",
            ToolKind::RequestSuggestions => "requestSuggestions",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolKind> {
        ToolKind::iter().find(|kind| kind.name() == name)
    }

    pub fn definition(&self) -> Tool {
        match self {
            ToolKind::GetWeather => Tool::new(
                self.name(),
                "Get the current weather at a location",
                json!({
                    "type": "object",
                    "properties": {
                        "latitude": {"type": "number"},
                        "longitude": {"type": "number"}
                    },
                    "required": ["latitude", "longitude"]
                }),
            ),
            ToolKind::CreateDocument => Tool::new(
                self.name(),
                "Create a document for a writing or content creation activities. This tool will call other functions that will generate the contents of the document based on the title and kind.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "kind": {"type": "string", "enum": ["text", "code", "sheet"]}
                    },
                    "required": ["title", "kind"]
                }),
            ),
            ToolKind::UpdateDocument => Tool::new(
                self.name(),
                "Update a document with the given description.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {
                            "type": "string",
                            "description": "The ID of the document to update"
                        },
                        "description": {
                            "type": "string",
                            "description": "The description of changes that need to be made"
                        }
                    },
                    "required": ["id", "description"]
                }),
            ),
            ToolKind::RequestSuggestions => Tool::new(
                self.name(),
                "Request suggestions for a document",
                json!({
                    "type": "object",
                    "properties": {
                        "documentId": {
                            "type": "string",
                            "description": "The ID of the document to request edits"
                        }
                    },
                    "required": ["documentId"]
                }),
            ),
        }
    }

    pub async fn call(&self, ctx: &ToolContext, arguments: Value) -> AgentResult<Value> {
        match self {
            ToolKind::GetWeather => weather::get_weather(ctx, parse_args(arguments)?).await,
            ToolKind::CreateDocument => {
                documents::create_document(ctx, parse_args(arguments)?).await
            }
            ToolKind::UpdateDocument => {
                documents::update_document(ctx, parse_args(arguments)?).await
            }
            ToolKind::RequestSuggestions => {
                suggestions::request_suggestions(ctx, parse_args(arguments)?).await
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> AgentResult<T> {
    serde_json::from_value(arguments).map_err(|e| AgentError::InvalidParameters(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::session::UserType;
    use crate::providers::registry::ChatModel;
    use crate::providers::mock::MockProvider;
    use crate::models::message::Message;
    use crate::store::MemoryStore;
    use crate::stream::StreamEvent;
    use tokio::sync::mpsc::UnboundedReceiver;

    pub(crate) fn context_with_artifact(
        responses: Vec<Message>,
    ) -> (ToolContext, UnboundedReceiver<StreamEvent>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = ProviderRegistry::new().with(
            ChatModel::Artifact,
            Arc::new(MockProvider::new(responses)),
        );
        let (writer, rx) = DataStreamWriter::channel();
        let ctx = ToolContext::new(
            Session::new("user-1", UserType::Regular),
            writer,
            store.clone(),
            Arc::new(registry),
        );
        (ctx, rx, store)
    }

    pub(crate) fn drain(rx: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_names_round_trip() {
        for kind in ToolKind::all() {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
            assert_eq!(kind.definition().name, kind.name());
        }
        assert_eq!(ToolKind::from_name("deleteEverything"), None);
    }

    #[tokio::test]
    async fn test_bad_arguments_are_invalid_parameters() {
        let (ctx, _rx, _store) = context_with_artifact(vec![]);
        let result = ToolKind::CreateDocument
            .call(&ctx, json!({"title": "Essay"}))
            .await;
        assert!(matches!(result, Err(AgentError::InvalidParameters(_))));
    }
}
