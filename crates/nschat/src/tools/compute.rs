use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use super::{script_parameters, Capability, LogFn, ToolContext, ToolItem};
use crate::kernel::runner::ScriptHandlers;
use crate::models::tool::Tool;

pub const COMPUTE_SCRIPT_TOOL: &str = "compute_script";

/// Returned instead of running a script the user rejected
pub const NOT_APPROVED: &str = "The user did not approve running this script.";

const DETAILED_DESCRIPTION: &str = "\
Use compute_script to run a Python script and read back what it prints. \
Only text written to stdout and stderr is returned, so print every value you \
need. Each call runs in a fresh interpreter; nothing is kept between calls. \
Use figure_script instead when the goal is to show a plot to the user.";

/// Runs a script and answers with its printed output
pub struct ComputeScript;

pub fn compute_script_tool() -> ToolItem {
    ToolItem::new(
        Tool::new(
            COMPUTE_SCRIPT_TOOL,
            "Run a Python script and return its text output",
            script_parameters("The Python script to run"),
        ),
        Arc::new(ComputeScript),
    )
    .serial()
    .with_detailed_description(DETAILED_DESCRIPTION)
}

pub(crate) fn script_argument(args: &Value) -> Result<&str> {
    args.get("script")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Missing required argument: script"))
}

/// Collected text output of one script run
#[derive(Default)]
pub(crate) struct Transcript {
    stdout: String,
    stderr: String,
}

impl Transcript {
    /// Handlers that record stdout/stderr and relay them to the progress sinks
    pub(crate) fn handlers(
        transcript: &Arc<Mutex<Transcript>>,
        ctx: &ToolContext,
    ) -> ScriptHandlers {
        let (out, err) = (Arc::clone(transcript), Arc::clone(transcript));
        let (out_ctx, err_ctx) = (ctx.clone(), ctx.clone());
        ScriptHandlers::default()
            .on_stdout(move |text| {
                out_ctx.stdout(text);
                if let Ok(mut t) = out.lock() {
                    t.stdout.push_str(text);
                }
            })
            .on_stderr(move |text| {
                err_ctx.stderr(text);
                if let Ok(mut t) = err.lock() {
                    t.stderr.push_str(text);
                }
            })
    }

    pub(crate) fn render(&self) -> String {
        let mut response = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !response.is_empty() && !response.ends_with('\n') {
                response.push('\n');
            }
            response.push_str("stderr:\n");
            response.push_str(&self.stderr);
        }
        response
    }
}

#[async_trait]
impl Capability for ComputeScript {
    async fn call(&self, args: Value, on_log_message: LogFn, ctx: ToolContext) -> Result<Value> {
        let script = script_argument(&args)?;
        if !ctx.confirm_okay_to_run(script).await? {
            return Ok(json!(NOT_APPROVED));
        }
        on_log_message(COMPUTE_SCRIPT_TOOL, script);

        let transcript = Arc::new(Mutex::new(Transcript::default()));
        ctx.execute_script(script, Transcript::handlers(&transcript, &ctx))
            .await?;

        let response = transcript
            .lock()
            .map(|t| t.render())
            .map_err(|_| anyhow!("script output was lost"))?;
        if response.trim().is_empty() {
            return Ok(json!("The script ran successfully but printed nothing."));
        }
        Ok(json!(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ConfirmationGate;
    use crate::kernel::mock::{KernelCounters, ScriptedKernel};
    use crate::kernel::runner::ScriptRunner;
    use crate::models::output::OutputItem;
    use crate::status::StatusBoard;

    fn context(kernel: ScriptedKernel) -> ToolContext {
        ToolContext {
            execute_script: Some(Arc::new(ScriptRunner::new(
                Arc::new(kernel),
                StatusBoard::new(),
            ))),
            ..ToolContext::new("test-model")
        }
    }

    fn no_log() -> LogFn {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn test_returns_stdout_and_stderr() {
        let ctx = context(ScriptedKernel::new(vec![
            OutputItem::stdout("42\n"),
            OutputItem::stderr("careful\n"),
        ]));
        let result = ComputeScript
            .call(json!({"script": "print(42)"}), no_log(), ctx)
            .await
            .unwrap();
        assert_eq!(result, json!("42\nstderr:\ncareful\n"));
    }

    #[tokio::test]
    async fn test_relays_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut ctx = context(ScriptedKernel::new(vec![OutputItem::stdout("line\n")]));
        ctx.on_stdout = Some(Arc::new(move |text: &str| {
            sink.lock().unwrap().push(text.to_string())
        }));

        ComputeScript
            .call(json!({"script": "print('line')"}), no_log(), ctx)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["line\n"]);
    }

    #[tokio::test]
    async fn test_missing_script_argument() {
        let err = ComputeScript
            .call(json!({}), no_log(), context(ScriptedKernel::new(vec![])))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: script");
    }

    #[tokio::test]
    async fn test_rejected_script_is_not_run() {
        let counters = KernelCounters::default();
        let gate = Arc::new(ConfirmationGate::new());
        let mut ctx = context(ScriptedKernel::new(vec![]).with_counters(counters.clone()));
        ctx.confirm_okay_to_run = Some(Arc::clone(&gate));

        let call = tokio::spawn(async move {
            ComputeScript
                .call(json!({"script": "import os"}), no_log(), ctx)
                .await
        });
        let mut status = gate.subscribe();
        status
            .wait_for(|s| *s != crate::confirm::ConfirmationStatus::None)
            .await
            .unwrap();
        gate.cancel();

        assert_eq!(call.await.unwrap().unwrap(), json!(NOT_APPROVED));
        assert_eq!(counters.executions(), 0);
    }

    #[tokio::test]
    async fn test_session_error_propagates() {
        let ctx = context(ScriptedKernel::new(vec![]).unreachable());
        let err = ComputeScript
            .call(json!({"script": "1"}), no_log(), ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }
}
