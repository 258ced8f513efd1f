use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::DispatchError;
use crate::models::message::{Message, ToolCallRequest};
use crate::models::output::StreamKind;
use crate::status::StatusBoard;
use crate::tools::{render_response, LogFn, ToolContext, ToolItem, ToolRegistry};

/// Runs batches of tool calls against the registered capabilities
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    running: AtomicBool,
}

/// Clears the running flag and the batch's transient status however the
/// batch ends
struct BatchGuard<'a> {
    running: &'a AtomicBool,
    status: &'a StatusBoard,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.status.update(|s| {
            s.pending_tool_calls.clear();
            s.agent_progress.clear();
        });
        self.running.store(false, Ordering::SeqCst);
    }
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute every call of one assistant message and return one `tool`
    /// message per call. Serial tools run first, one at a time and in array
    /// order; the rest then run concurrently.
    ///
    /// Only an unknown tool name fails the batch. Capability errors become
    /// `"Error: ..."` responses.
    pub async fn run_batch(
        &self,
        calls: &[ToolCallRequest],
        ctx: &ToolContext,
        status: &StatusBoard,
    ) -> Result<Vec<Message>, DispatchError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::BatchInProgress);
        }
        let _guard = BatchGuard {
            running: &self.running,
            status,
        };
        status.update(|s| {
            s.agent_progress.clear();
            s.pending_tool_calls = calls.to_vec();
        });

        let mut serial = Vec::new();
        let mut parallel = Vec::new();
        for call in calls {
            let item = self
                .registry
                .get(call.name())
                .ok_or_else(|| DispatchError::UnknownTool(call.name().to_string()))?;
            if item.serial {
                serial.push((call, item));
            } else {
                parallel.push((call, item));
            }
        }
        debug!(
            serial = serial.len(),
            parallel = parallel.len(),
            "running tool call batch"
        );

        let mut responses = Vec::with_capacity(calls.len());
        for (call, item) in serial {
            responses.push(process_tool_call(call, item, ctx, status).await);
        }
        let concurrent = parallel
            .into_iter()
            .map(|(call, item)| process_tool_call(call, item, ctx, status));
        responses.extend(join_all(concurrent).await);

        Ok(responses)
    }
}

async fn process_tool_call(
    call: &ToolCallRequest,
    item: &ToolItem,
    ctx: &ToolContext,
    status: &StatusBoard,
) -> Message {
    let name = call.name().to_string();
    status.add_progress(StreamKind::Stdout, format!("Running tool: {}", name));

    let args = match call.parse_arguments() {
        Ok(args) => args,
        Err(e) => {
            let content = format!("Error: Could not parse arguments for {}: {}", name, e);
            info!(tool = %name, "{}", content);
            return Message::tool(&call.id, content);
        }
    };
    info!(tool = %name, id = %call.id, arguments = %args, "tool call");

    let log_name = name.clone();
    let on_log_message: LogFn = Arc::new(move |title: &str, message: &str| {
        info!(tool = %log_name, "{}: {}", title, message);
    });

    let content = match item.function.call(args, on_log_message, ctx.clone()).await {
        Ok(value) => render_response(value),
        Err(e) => format!("Error: {}", e),
    };
    info!(tool = %name, id = %call.id, response = %content, "tool response");
    Message::tool(&call.id, content)
}
