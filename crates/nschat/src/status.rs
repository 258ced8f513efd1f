use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::message::ToolCallRequest;
use crate::models::output::{AgentProgressMessage, StreamKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    #[default]
    #[serde(rename = "none")]
    Idle,
    Starting,
    Running,
}

/// Transient agent state surfaced to the view layer; none of it is persisted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentStatus {
    pub completion_failed: bool,
    pub pending_tool_calls: Vec<ToolCallRequest>,
    pub agent_progress: Vec<AgentProgressMessage>,
    pub script_status: ScriptStatus,
    pub last_batch_error: Option<String>,
}

/// Shared, observable handle on the `AgentStatus`
#[derive(Clone)]
pub struct StatusBoard {
    sender: Arc<watch::Sender<AgentStatus>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(AgentStatus::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> AgentStatus {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentStatus> {
        self.sender.subscribe()
    }

    pub fn update(&self, f: impl FnOnce(&mut AgentStatus)) {
        self.sender.send_modify(f);
    }

    pub fn add_progress<S: Into<String>>(&self, kind: StreamKind, message: S) {
        let message = message.into();
        self.update(|status| {
            status
                .agent_progress
                .push(AgentProgressMessage { kind, message })
        });
    }

    pub fn reset_progress(&self) {
        self.sender.send_if_modified(|status| {
            if status.agent_progress.is_empty() {
                return false;
            }
            status.agent_progress.clear();
            true
        });
    }

    pub fn set_script_status(&self, script_status: ScriptStatus) {
        self.update(|status| status.script_status = script_status);
    }

    pub fn script_status(&self) -> ScriptStatus {
        self.sender.borrow().script_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_accumulates_and_resets() {
        let board = StatusBoard::new();
        board.add_progress(StreamKind::Stdout, "Running tool: x");
        board.add_progress(StreamKind::Stderr, "warning");
        assert_eq!(board.get().agent_progress.len(), 2);
        assert_eq!(board.get().agent_progress[1].kind, StreamKind::Stderr);

        board.reset_progress();
        assert!(board.get().agent_progress.is_empty());
    }

    #[test]
    fn test_script_status_serializes_as_none() {
        assert_eq!(serde_json::to_string(&ScriptStatus::Idle).unwrap(), "\"none\"");
        assert_eq!(serde_json::to_string(&ScriptStatus::Running).unwrap(), "\"running\"");
    }
}
