use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use strum_macros::{Display, EnumIter, EnumString};

use super::base::Provider;
use super::configs::ModelSettings;
use super::openai::OpenAiProvider;
use super::reasoning::ReasoningMiddleware;

/// The logical models the application asks for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum ChatModel {
    #[serde(rename = "chat-model")]
    #[strum(serialize = "chat-model")]
    Chat,
    #[serde(rename = "chat-model-reasoning")]
    #[strum(serialize = "chat-model-reasoning")]
    ChatReasoning,
    #[serde(rename = "title-model")]
    #[strum(serialize = "title-model")]
    Title,
    #[serde(rename = "artifact-model")]
    #[strum(serialize = "artifact-model")]
    Artifact,
}

impl ChatModel {
    pub fn is_reasoning(&self) -> bool {
        matches!(self, ChatModel::ChatReasoning)
    }
}

/// Maps each logical model to the provider serving it
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ChatModel, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the production registry: every model goes through the OpenAI compatible gateway,
    /// and the reasoning model gets its thinking split out.
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        let chat = Arc::new(OpenAiProvider::new(
            settings.provider_config(&settings.chat_model),
        )?);
        let reasoning_base: Arc<dyn Provider> = Arc::new(OpenAiProvider::new(
            settings.provider_config(&settings.reasoning_model),
        )?);
        let title = Arc::new(OpenAiProvider::new(
            settings.provider_config(&settings.title_model),
        )?);
        let artifact = Arc::new(OpenAiProvider::new(
            settings.provider_config(&settings.artifact_model),
        )?);

        Ok(Self::new()
            .with(ChatModel::Chat, chat)
            .with(
                ChatModel::ChatReasoning,
                Arc::new(ReasoningMiddleware::new(reasoning_base)),
            )
            .with(ChatModel::Title, title)
            .with(ChatModel::Artifact, artifact))
    }

    pub fn with(mut self, model: ChatModel, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(model, provider);
        self
    }

    pub fn language_model(&self, model: ChatModel) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(&model)
            .cloned()
            .ok_or_else(|| anyhow!("No provider registered for {}", model))
    }
}
