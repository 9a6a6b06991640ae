use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, Usage};
use crate::providers::utils::BillingError;

/// A scripted failure for the mock provider
#[derive(Debug, Clone)]
pub enum MockFailure {
    Billing,
    Other(String),
}

/// What the mock provider was asked for on one call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    model_id: String,
    responses: Arc<Mutex<Vec<Result<Message, MockFailure>>>>,
    usage: Usage,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock provider whose responses may fail
    pub fn from_results(responses: Vec<Result<Message, MockFailure>>) -> Self {
        Self {
            model_id: "mock-model".to_string(),
            responses: Arc::new(Mutex::new(responses)),
            usage: Usage::default(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Usage reported with every successful response
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system: system.to_string(),
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }

        let next = {
            let mut responses = self
                .responses
                .lock()
                .map_err(|_| anyhow!("mock provider poisoned"))?;
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };

        match next {
            // Return empty response if no more pre-configured responses
            None => Ok((Message::assistant().with_text(""), self.usage.clone())),
            Some(Ok(message)) => Ok((message, self.usage.clone())),
            Some(Err(MockFailure::Billing)) => {
                Err(BillingError("a valid credit card is required".to_string()).into())
            }
            Some(Err(MockFailure::Other(message))) => Err(anyhow!(message)),
        }
    }
}
