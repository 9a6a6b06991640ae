/// Connection settings for an OpenAI compatible endpoint serving one model
#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

/// Which concrete model backs each logical chat model. All of them are reached through the
/// same gateway host and key.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub host: String,
    pub api_key: String,
    pub chat_model: String,
    pub reasoning_model: String,
    pub title_model: String,
    pub artifact_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl ModelSettings {
    pub fn provider_config(&self, model: &str) -> OpenAiProviderConfig {
        OpenAiProviderConfig {
            host: self.host.clone(),
            api_key: self.api_key.clone(),
            model: model.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}
