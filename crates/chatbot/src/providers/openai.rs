use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_billing_error, check_openai_context_length_error, messages_to_openai_spec,
    openai_response_to_message, tools_to_openai_spec,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

const REQUEST_TIMEOUT_SECS: u64 = 600;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

/// Body of a chat completion call; optional knobs are left out when unset
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: Option<i32>,
    completion_tokens: Option<i32>,
    total_tokens: Option<i32>,
}

impl From<CompletionUsage> for Usage {
    fn from(usage: CompletionUsage) -> Self {
        let total = usage.total_tokens.or(match (usage.prompt_tokens, usage.completion_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });
        Usage::new(usage.prompt_tokens, usage.completion_tokens, total)
    }
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        )
    }

    async fn send(&self, request: &CompletionRequest<'_>) -> Result<Value> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response.json().await?);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(anyhow!("Gateway unavailable: {}", status));
        }

        let body = response.text().await.unwrap_or_default();
        match check_billing_error(status.as_u16(), &body) {
            Some(billing) => Err(billing.into()),
            None => Err(anyhow!("Request failed: {}\nBody: {}", status, body)),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let mut wire_messages = vec![json!({ "role": "system", "content": system })];
        wire_messages.extend(messages_to_openai_spec(messages));

        let request = CompletionRequest {
            model: &self.config.model,
            messages: wire_messages,
            tools: tools_to_openai_spec(tools)?,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut response = self.send(&request).await?;
        if let Some(error) = response.get("error") {
            return Err(match check_openai_context_length_error(error) {
                Some(too_long) => too_long.into(),
                None => anyhow!("Gateway returned an error: {}", error),
            });
        }

        let usage: Usage = match response.get_mut("usage").map(Value::take) {
            Some(raw) => serde_json::from_value::<CompletionUsage>(raw)?.into(),
            None => return Err(anyhow!("No usage data in response")),
        };
        let message = openai_response_to_message(response)?;

        Ok((message, usage))
    }
}
