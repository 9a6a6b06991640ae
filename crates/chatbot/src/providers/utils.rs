use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").expect("valid regex");
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid regex");
}

/// Convert internal Message format to OpenAI's API message specification
///   reasoning parts are never sent back to the model, and attachments become image parts
///   next to the user's text
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = serde_json::Map::new();
        converted.insert("role".to_string(), json!(message.role));

        let mut output = Vec::new();
        let mut tool_calls = Vec::new();
        let mut text = String::new();

        for content in &message.content {
            match content {
                MessageContent::Text(part) => text.push_str(&part.text),
                MessageContent::Reasoning(_) => continue,
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        tool_calls.push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&tool_call.name),
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }));
                    }
                    Err(e) => {
                        output.push(json!({
                            "role": "tool",
                            "content": format!("Error: {}", e),
                            "tool_call_id": request.id
                        }));
                    }
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(result) => {
                        output.push(json!({
                            "role": "tool",
                            "content": result.to_string(),
                            "tool_call_id": response.id
                        }));
                    }
                    Err(e) => {
                        // A tool result error is shown as output so the model can interpret the error message
                        output.push(json!({
                            "role": "tool",
                            "content": format!("The tool call returned the following error:\n{}", e),
                            "tool_call_id": response.id
                        }));
                    }
                },
            }
        }

        if !message.attachments.is_empty() && message.role == Role::User {
            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(json!({"type": "text", "text": text}));
            }
            for attachment in &message.attachments {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {"url": attachment.url}
                }));
            }
            converted.insert("content".to_string(), json!(parts));
        } else if !text.is_empty() {
            converted.insert("content".to_string(), json!(text));
        }

        if !tool_calls.is_empty() {
            converted.insert("tool_calls".to_string(), json!(tool_calls));
        }

        if converted.contains_key("content") || converted.contains_key("tool_calls") {
            output.insert(0, Value::Object(converted));
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Turn one returned function call into a tool request, keeping malformed calls as errors
/// the model gets to see
fn parse_tool_call(call: WireToolCall) -> (String, Result<ToolCall, AgentError>) {
    let WireToolCall { id, function } = call;
    if !is_valid_function_name(&function.name) {
        let error = AgentError::ToolNotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            function.name
        ));
        return (id, Err(error));
    }

    let parsed = serde_json::from_str::<Value>(&function.arguments)
        .map(|arguments| ToolCall::new(&function.name, arguments))
        .map_err(|e| {
            AgentError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                id, e
            ))
        });
    (id, parsed)
}

/// Convert the first choice of a chat completion into an assistant message
pub fn openai_response_to_message(mut response: Value) -> Result<Message> {
    let wire: WireMessage = match response.pointer_mut("/choices/0/message").map(Value::take) {
        Some(choice) if !choice.is_null() => serde_json::from_value(choice)?,
        _ => WireMessage::default(),
    };

    let mut message = Message::assistant();
    if let Some(text) = wire.content.filter(|text| !text.is_empty()) {
        message = message.with_text(text);
    }
    for call in wire.tool_calls.unwrap_or_default() {
        let (id, tool_call) = parse_tool_call(call);
        message = message.with_tool_request(id, tool_call);
    }

    Ok(message)
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}

/// The upstream gateway refused the request because of the account's billing state
#[derive(Debug, Clone, thiserror::Error)]
#[error("Provider rejected the request due to billing: {0}")]
pub struct BillingError(pub String);

/// Classify a non-success gateway response as a billing rejection.
///   402 always is one; 401/403 only when the body talks about billing
pub fn check_billing_error(status: u16, body: &str) -> Option<BillingError> {
    if status == 402 {
        return Some(BillingError(body.to_string()));
    }
    if status == 401 || status == 403 {
        let lowered = body.to_lowercase();
        let mentions_billing = ["credit card", "billing", "insufficient_quota", "payment"]
            .iter()
            .any(|needle| lowered.contains(needle));
        if mentions_billing {
            return Some(BillingError(body.to_string()));
        }
    }
    None
}
