use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::message::{Message, ToolCallRequest};
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// One request to the completion service. `messages` starts with the system
/// message and never contains client-side-only messages.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model_name: String,
    /// Overrides the provider's configured key when set
    pub credentials: Option<String>,
    pub tools: Vec<Tool>,
}

/// Result of a completion: either assistant text or tool call requests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub assistant_message: Option<String>,
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    pub usage: Usage,
}

impl Completion {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            assistant_message: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Default::default()
        }
    }

    /// The assistant message appended to the conversation. Tool calls win
    /// over text when a response carries both; a response with neither is
    /// an error.
    pub fn into_message(self) -> Result<Message> {
        match (self.tool_calls, self.assistant_message) {
            (Some(calls), _) if !calls.is_empty() => {
                Ok(Message::assistant_tool_calls(None, calls))
            }
            (_, Some(text)) if !text.is_empty() => Ok(Message::assistant(text)),
            _ => Err(anyhow!("Unexpected: no assistant message and no tool calls")),
        }
    }
}

/// Base trait for completion services
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next assistant turn for the given conversation
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}
