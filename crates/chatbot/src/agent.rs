use anyhow::Result;
use futures::stream::BoxStream;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, MessageContent, ToolRequest};
use crate::models::tool::Tool;
use crate::providers::base::{Provider, Usage};
use crate::tools::{ToolContext, ToolKind};
use serde_json::Value;
use std::sync::Arc;

/// Upper bound on model calls within one reply
pub const MAX_STEPS: usize = 5;

/// Something the agent produced while replying
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    /// A finished assistant message or the tool results answering it
    Message(Message),
    /// Token usage summed over every step, sent once at the end
    Usage(Usage),
}

/// Agent drives a model through tool calls until it answers or runs out of steps
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Vec<ToolKind>,
    context: Option<ToolContext>,
}

impl Agent {
    /// Create a new Agent with the specified provider and no tools
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            tools: Vec::new(),
            context: None,
        }
    }

    /// Make tools available; they run against `context`
    pub fn with_tools(mut self, tools: Vec<ToolKind>, context: ToolContext) -> Self {
        self.tools = tools;
        self.context = Some(context);
        self
    }

    fn active_tools(&self) -> Vec<Tool> {
        if self.context.is_none() {
            return Vec::new();
        }
        self.tools.iter().map(ToolKind::definition).collect()
    }

    /// Dispatch a single tool call to the tool it names
    async fn dispatch_tool_call(&self, request: &ToolRequest) -> AgentResult<Value> {
        let call = request.tool_call.clone()?;
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        let kind = ToolKind::from_name(&call.name)
            .filter(|kind| self.tools.contains(kind))
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        kind.call(context, call.arguments).await
    }

    /// Create a stream that yields each message as it's generated by the agent.
    /// This includes both the assistant's responses and any tool responses, followed by
    /// the total usage.
    pub fn reply<'a>(
        &'a self,
        system: &'a str,
        messages: &[Message],
    ) -> BoxStream<'a, Result<ReplyEvent>> {
        let mut messages = messages.to_vec();
        let tools = self.active_tools();

        Box::pin(async_stream::try_stream! {
            let mut total = Usage::default();

            for step in 1..=MAX_STEPS {
                let (mut response, usage) = self.provider.complete(
                    system,
                    &messages,
                    &tools,
                ).await?;
                total = total.add(&usage);

                if tools.is_empty() {
                    // a model may still hallucinate calls; nothing can answer them
                    response.content.retain(|c| !matches!(c, MessageContent::ToolRequest(_)));
                }

                yield ReplyEvent::Message(response.clone());

                // ensures the message above is delivered before tools start running
                tokio::task::yield_now().await;

                let tool_requests = response.tool_requests();
                if tool_requests.is_empty() {
                    break;
                }

                // Dispatch in parallel but wait until all are finished
                let futures: Vec<_> = tool_requests
                    .iter()
                    .map(|request| self.dispatch_tool_call(request))
                    .collect();
                let outputs = futures::future::join_all(futures).await;

                let mut message_tool_response = Message::tool();
                for (request, output) in tool_requests.iter().zip(outputs.into_iter()) {
                    message_tool_response = message_tool_response.with_tool_response(
                        request.id.clone(),
                        output,
                    );
                }

                yield ReplyEvent::Message(message_tool_response.clone());

                messages.push(response.clone());
                messages.push(message_tool_response);

                if step == MAX_STEPS {
                    tracing::debug!(steps = MAX_STEPS, "reply stopped at step limit");
                }
            }

            yield ReplyEvent::Usage(total);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use crate::models::tool::ToolCall;
    use crate::providers::mock::{MockFailure, MockProvider};
    use crate::tools::tests::context_with_artifact;
    use futures::StreamExt;
    use serde_json::json;

    async fn collect(agent: &Agent, messages: &[Message]) -> Vec<Result<ReplyEvent>> {
        agent.reply("system", messages).collect().await
    }

    fn messages_only(events: &[Result<ReplyEvent>]) -> Vec<Message> {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(ReplyEvent::Message(m)) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_simple_response() {
        let response = Message::assistant().with_text("Hello!");
        let provider = Arc::new(
            MockProvider::new(vec![response.clone()])
                .with_usage(Usage::new(Some(3), Some(2), Some(5))),
        );
        let agent = Agent::new(provider);

        let events = collect(&agent, &[Message::user().with_text("Hi")]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(messages_only(&events), vec![response]);
        assert!(matches!(
            events.last(),
            Some(Ok(ReplyEvent::Usage(usage))) if *usage == Usage::new(Some(3), Some(2), Some(5))
        ));
    }

    #[tokio::test]
    async fn test_tool_call_round() {
        let (ctx, _rx, _store) = context_with_artifact(vec![]);
        let provider = Arc::new(
            MockProvider::new(vec![
                Message::assistant().with_tool_request(
                    "call_1",
                    Ok(ToolCall::new("updateDocument", json!({"id": "missing", "description": "x"}))),
                ),
                Message::assistant().with_text("There is no such document."),
            ])
            .with_usage(Usage::new(Some(1), Some(1), Some(2))),
        );
        let agent = Agent::new(provider.clone()).with_tools(ToolKind::all(), ctx);

        let events = collect(&agent, &[Message::user().with_text("update it")]).await;
        let messages = messages_only(&events);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Tool);
        let response = messages[1].content[0].as_tool_response().unwrap();
        assert_eq!(response.id, "call_1");
        assert_eq!(response.tool_result, Ok(json!({"error": "Document not found"})));
        assert_eq!(messages[2].text(), "There is no such document.");

        // the second step sees the call and its result
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].messages.len(), 3);
        assert_eq!(calls[0].tools.len(), 4);
        assert!(matches!(
            events.last(),
            Some(Ok(ReplyEvent::Usage(usage))) if usage.total_tokens == Some(4)
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let (ctx, _rx, _store) = context_with_artifact(vec![]);
        let provider = Arc::new(MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("call_1", Ok(ToolCall::new("launchRockets", json!({})))),
            Message::assistant().with_text("I can't do that."),
        ]));
        let agent = Agent::new(provider).with_tools(ToolKind::all(), ctx);

        let events = collect(&agent, &[Message::user().with_text("go")]).await;
        let messages = messages_only(&events);
        let response = messages[1].content[0].as_tool_response().unwrap();
        assert!(matches!(response.tool_result, Err(AgentError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_stops_at_step_limit() {
        let (ctx, _rx, _store) = context_with_artifact(vec![]);
        let looping: Vec<Message> = (0..10)
            .map(|i| {
                Message::assistant().with_tool_request(
                    format!("call_{}", i),
                    Ok(ToolCall::new("requestSuggestions", json!({"documentId": "none"}))),
                )
            })
            .collect();
        let provider = Arc::new(MockProvider::new(looping));
        let agent = Agent::new(provider.clone()).with_tools(ToolKind::all(), ctx);

        let events = collect(&agent, &[Message::user().with_text("loop")]).await;
        assert_eq!(provider.calls().len(), MAX_STEPS);
        assert_eq!(messages_only(&events).len(), MAX_STEPS * 2);
    }

    #[tokio::test]
    async fn test_without_tools_requests_are_dropped() {
        let provider = Arc::new(MockProvider::new(vec![Message::assistant()
            .with_reasoning("hmm")
            .with_text("Answer")
            .with_tool_request("call_1", Ok(ToolCall::new("getWeather", json!({}))))]));
        let agent = Agent::new(provider.clone());

        let events = collect(&agent, &[Message::user().with_text("q")]).await;
        let messages = messages_only(&events);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].tool_requests().is_empty());
        assert_eq!(messages[0].text(), "Answer");
        assert!(provider.calls()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_ends_stream() {
        let provider = Arc::new(MockProvider::from_results(vec![Err(MockFailure::Other(
            "gateway down".to_string(),
        ))]));
        let agent = Agent::new(provider);

        let events = collect(&agent, &[Message::user().with_text("q")]).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }
}
