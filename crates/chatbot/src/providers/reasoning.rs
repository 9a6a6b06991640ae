use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

use super::base::{Provider, Usage};
use crate::models::message::{Message, MessageContent};
use crate::models::tool::Tool;

/// Split `<tag>...</tag>` sections out of model text.
///
/// Returns the joined reasoning (None when the tag never appears) and the visible remainder.
pub fn extract_reasoning(text: &str, tag: &str) -> (Option<String>, String) {
    let pattern = format!(
        "(?s)<{tag}>(.*?)</{tag}>",
        tag = regex::escape(tag)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return (None, text.to_string());
    };

    let reasoning: Vec<String> = re
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .collect();
    if reasoning.is_empty() {
        return (None, text.to_string());
    }

    let visible = re.replace_all(text, "").trim().to_string();
    (Some(reasoning.join("\n")), visible)
}

/// Wraps a provider whose model thinks out loud inside a tag, moving that text into a
/// separate reasoning part ahead of the visible answer.
pub struct ReasoningMiddleware {
    inner: Arc<dyn Provider>,
    tag: String,
}

impl ReasoningMiddleware {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self::with_tag(inner, "think")
    }

    pub fn with_tag(inner: Arc<dyn Provider>, tag: impl Into<String>) -> Self {
        Self {
            inner,
            tag: tag.into(),
        }
    }

    fn split(&self, message: Message) -> Message {
        let mut reasoning = Vec::new();
        let mut rest = Vec::new();

        for content in message.content.iter().cloned() {
            match content {
                MessageContent::Text(text) => {
                    let (extracted, visible) = extract_reasoning(&text.text, &self.tag);
                    if let Some(extracted) = extracted {
                        reasoning.push(MessageContent::reasoning(extracted));
                    }
                    if !visible.is_empty() {
                        rest.push(MessageContent::text(visible));
                    }
                }
                other => rest.push(other),
            }
        }

        reasoning.extend(rest);
        Message {
            content: reasoning,
            ..message
        }
    }
}

#[async_trait]
impl Provider for ReasoningMiddleware {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let (message, usage) = self.inner.complete(system, messages, tools).await?;
        Ok((self.split(message), usage))
    }
}
