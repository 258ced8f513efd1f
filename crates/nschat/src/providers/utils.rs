use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use super::base::{Completion, Usage};
use crate::models::message::{FunctionCall, Message, ToolCallRequest};
use crate::models::tool::Tool;

/// Convert conversation messages to the OpenAI chat message specification.
/// Client-side-only messages are dropped.
pub fn messages_to_openai_spec(messages: &[Message]) -> Result<Vec<Value>> {
    messages
        .iter()
        .filter(|m| !m.is_ephemeral())
        .map(|m| serde_json::to_value(m).map_err(Into::into))
        .collect()
}

/// Convert tool schemas to the OpenAI tool specification
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
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Parse an OpenAI chat completion response
pub fn openai_response_to_completion(response: &Value) -> Result<Completion> {
    let message = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow!("No message in completion response"))?;

    let assistant_message = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let tool_calls = match message.get("tool_calls").and_then(Value::as_array) {
        Some(calls) => Some(
            calls
                .iter()
                .map(parse_tool_call)
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };

    Ok(Completion {
        assistant_message,
        tool_calls,
        usage: get_usage(response),
    })
}

fn parse_tool_call(tool_call: &Value) -> Result<ToolCallRequest> {
    let id = tool_call["id"].as_str().unwrap_or_default().to_string();
    let name = tool_call["function"]["name"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if !is_valid_function_name(&name) {
        return Err(anyhow!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            name
        ));
    }
    // some providers send the arguments as an object rather than a string
    let arguments = match &tool_call["function"]["arguments"] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    Ok(ToolCallRequest {
        id,
        call_type: "function".to_string(),
        function: FunctionCall { name, arguments },
    })
}

pub fn get_usage(data: &Value) -> Usage {
    let Some(usage) = data.get("usage") else {
        return Usage::default();
    };

    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

pub fn is_valid_function_name(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid regex"))
        .is_match(name)
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
