//! Events a chat turn produces and their encoding as AI data stream (v1) lines.
//!
//! Everything a turn emits, model text as well as tool side channels, goes through one
//! ordered [`DataStreamWriter`] so the client sees events in the order they happened.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::providers::base::Usage;
use crate::store::Suggestion;
use crate::usage::AppUsage;

/// Custom data parts, sent on the `2:` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DataPart {
    #[serde(rename = "data-usage")]
    Usage(AppUsage),
    #[serde(rename = "data-kind")]
    Kind(String),
    #[serde(rename = "data-id")]
    Id(String),
    #[serde(rename = "data-title")]
    Title(String),
    #[serde(rename = "data-clear")]
    Clear,
    #[serde(rename = "data-textDelta")]
    TextDelta(String),
    #[serde(rename = "data-suggestion")]
    Suggestion(Suggestion),
    #[serde(rename = "data-finish")]
    Finish,
    #[serde(rename = "data-appendMessage")]
    AppendMessage(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    Reasoning(String),
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        result: Value,
    },
    Data(DataPart),
    Error(String),
    FinishStep {
        finish_reason: String,
    },
    Finish {
        finish_reason: String,
        usage: Usage,
    },
}

/// Cloneable handle for pushing events into a turn's output.
///
/// Sends never fail from the caller's point of view: once the reading side is gone the
/// events are dropped and generation carries on.
#[derive(Debug, Clone)]
pub struct DataStreamWriter {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl DataStreamWriter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn write(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    pub fn write_data(&self, part: DataPart) {
        self.write(StreamEvent::Data(part));
    }
}

fn json_line(prefix: &str, value: &Value) -> String {
    format!("{}:{}\n", prefix, value)
}

/// Encode one event as a data stream line, including the trailing newline
pub fn encode(event: &StreamEvent) -> String {
    match event {
        StreamEvent::TextDelta(text) => json_line("0", &json!(text)),
        StreamEvent::Reasoning(text) => json_line("g", &json!(text)),
        StreamEvent::ToolCall { id, name, args } => json_line(
            "9",
            &json!({
                "toolCallId": id,
                "toolName": name,
                "args": args
            }),
        ),
        StreamEvent::ToolResult { id, result } => json_line(
            "a",
            &json!({
                "toolCallId": id,
                "result": result
            }),
        ),
        StreamEvent::Data(part) => {
            let value = serde_json::to_value(part).unwrap_or(Value::Null);
            json_line("2", &json!([value]))
        }
        StreamEvent::Error(message) => json_line("3", &json!(message)),
        StreamEvent::FinishStep { finish_reason } => json_line(
            "e",
            &json!({
                "finishReason": finish_reason,
                "isContinued": false
            }),
        ),
        StreamEvent::Finish {
            finish_reason,
            usage,
        } => json_line(
            "d",
            &json!({
                "finishReason": finish_reason,
                "usage": {
                    "promptTokens": usage.input_tokens.unwrap_or(0),
                    "completionTokens": usage.output_tokens.unwrap_or(0)
                }
            }),
        ),
    }
}

/// Break text into word sized chunks, each word keeping the whitespace that follows it.
/// Concatenating the chunks gives back the input.
pub fn smooth_words(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut seen_word = false;
    let mut in_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            in_space = true;
        } else {
            if in_space && seen_word {
                chunks.push(std::mem::take(&mut current));
            }
            in_space = false;
            seen_word = true;
        }
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// The events that present a finished model or tool message to the client
pub fn message_events(message: &Message) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    match message.role {
        Role::Assistant => {
            let mut called_tools = false;
            for content in &message.content {
                match content {
                    MessageContent::Reasoning(reasoning) => {
                        events.push(StreamEvent::Reasoning(reasoning.text.clone()));
                    }
                    MessageContent::Text(text) => {
                        events.extend(smooth_words(&text.text).into_iter().map(StreamEvent::TextDelta));
                    }
                    MessageContent::ToolRequest(request) => {
                        called_tools = true;
                        match &request.tool_call {
                            Ok(tool_call) => events.push(StreamEvent::ToolCall {
                                id: request.id.clone(),
                                name: tool_call.name.clone(),
                                args: tool_call.arguments.clone(),
                            }),
                            // invalid calls stay in the history; their error response follows
                            Err(_) => events.push(StreamEvent::ToolCall {
                                id: request.id.clone(),
                                name: "invalid name".to_string(),
                                args: json!({}),
                            }),
                        }
                    }
                    MessageContent::ToolResponse(_) => continue,
                }
            }
            events.push(StreamEvent::FinishStep {
                finish_reason: if called_tools { "tool-calls" } else { "stop" }.to_string(),
            });
        }
        Role::Tool => {
            for response in message.content.iter().filter_map(MessageContent::as_tool_response) {
                let result = match &response.tool_result {
                    Ok(value) => value.clone(),
                    Err(e) => json!({"error": e.to_string()}),
                };
                events.push(StreamEvent::ToolResult {
                    id: response.id.clone(),
                    result,
                });
            }
        }
        Role::User => {}
    }

    events
}
