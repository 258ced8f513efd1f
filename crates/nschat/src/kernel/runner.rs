use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::session::SessionClient;
use super::KernelFactory;
use crate::errors::SessionResult;
use crate::models::output::{FigureFormat, ImageFormat, OutputItem};
use crate::status::{ScriptStatus, StatusBoard};

type TextHandler = Box<dyn Fn(&str) + Send + Sync>;
type ImageHandler = Box<dyn Fn(ImageFormat, &str) + Send + Sync>;
type FigureHandler = Box<dyn Fn(FigureFormat, &Value) + Send + Sync>;

/// Per-script sinks for the output items of one execution
#[derive(Default)]
pub struct ScriptHandlers {
    on_stdout: Option<TextHandler>,
    on_stderr: Option<TextHandler>,
    on_image: Option<ImageHandler>,
    on_figure: Option<FigureHandler>,
}

impl ScriptHandlers {
    pub fn on_stdout(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stdout = Some(Box::new(f));
        self
    }

    pub fn on_stderr(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stderr = Some(Box::new(f));
        self
    }

    pub fn on_image(mut self, f: impl Fn(ImageFormat, &str) + Send + Sync + 'static) -> Self {
        self.on_image = Some(Box::new(f));
        self
    }

    pub fn on_figure(mut self, f: impl Fn(FigureFormat, &Value) + Send + Sync + 'static) -> Self {
        self.on_figure = Some(Box::new(f));
        self
    }

    fn handle(&self, item: OutputItem) {
        match item {
            OutputItem::Stdout { content } => {
                if let Some(f) = &self.on_stdout {
                    f(&content)
                }
            }
            OutputItem::Stderr { content } => {
                if let Some(f) = &self.on_stderr {
                    f(&content)
                }
            }
            OutputItem::Image { format, content } => {
                if let Some(f) = &self.on_image {
                    f(format, &content)
                }
            }
            OutputItem::Figure { format, content } => {
                if let Some(f) = &self.on_figure {
                    f(format, &content)
                }
            }
        }
    }
}

/// The `executeScript` capability: runs each script in its own session and
/// exposes the cancel trigger for the script that is currently running.
pub struct ScriptRunner {
    kernels: Arc<dyn KernelFactory>,
    status: StatusBoard,
    cancel: Mutex<CancellationToken>,
}

impl ScriptRunner {
    pub fn new(kernels: Arc<dyn KernelFactory>, status: StatusBoard) -> Self {
        Self {
            kernels,
            status,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub async fn execute(&self, script: &str, handlers: ScriptHandlers) -> SessionResult<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();
        self.status.set_script_status(ScriptStatus::Starting);

        let mut client = SessionClient::new(self.kernels.create());
        client.on_output_item(move |item| handlers.handle(item));

        let result = self.run(&mut client, script, &cancel).await;

        client.shutdown().await;
        self.status.set_script_status(ScriptStatus::Idle);
        if let Err(e) = &result {
            debug!(error = %e, "script execution ended with an error");
        }
        result
    }

    async fn run(
        &self,
        client: &mut SessionClient,
        script: &str,
        cancel: &CancellationToken,
    ) -> SessionResult<()> {
        client.initiate().await?;
        self.status.set_script_status(ScriptStatus::Running);
        client.run_code_until_cancelled(script, cancel).await
    }

    /// Cancel the script in flight. Has no effect once it has finished.
    pub fn cancel(&self) -> bool {
        if self.status.script_status() == ScriptStatus::Idle {
            return false;
        }
        info!("cancelling running script");
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SessionError;
    use crate::kernel::mock::{KernelCounters, ScriptedKernel};
    use std::time::Duration;

    fn runner(kernel: ScriptedKernel) -> (Arc<ScriptRunner>, StatusBoard) {
        let status = StatusBoard::new();
        (
            Arc::new(ScriptRunner::new(Arc::new(kernel), status.clone())),
            status,
        )
    }

    #[tokio::test]
    async fn test_routes_items_to_handlers() {
        let kernel = ScriptedKernel::new(vec![
            OutputItem::stdout("out\n"),
            OutputItem::stderr("err\n"),
            OutputItem::png("aGk="),
            OutputItem::plotly(serde_json::json!({"data": []})),
        ]);
        let (runner, status) = runner(kernel);
        let log = Arc::new(Mutex::new(Vec::new()));

        let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());
        let handlers = ScriptHandlers::default()
            .on_stdout(move |s| a.lock().unwrap().push(format!("stdout:{s}")))
            .on_stderr(move |s| b.lock().unwrap().push(format!("stderr:{s}")))
            .on_image(move |_, data| c.lock().unwrap().push(format!("image:{data}")))
            .on_figure(move |_, _| d.lock().unwrap().push("figure".to_string()));

        runner.execute("print('out')", handlers).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["stdout:out\n", "stderr:err\n", "image:aGk=", "figure"]
        );
        assert_eq!(status.script_status(), ScriptStatus::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_once_per_execution() {
        let counters = KernelCounters::default();
        let (runner, _) = runner(ScriptedKernel::new(vec![]).with_counters(counters.clone()));
        runner.execute("a", ScriptHandlers::default()).await.unwrap();
        runner.execute("b", ScriptHandlers::default()).await.unwrap();
        assert_eq!(counters.connects(), 2);
        assert_eq!(counters.disconnects(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_after_remote_error() {
        let counters = KernelCounters::default();
        let kernel = ScriptedKernel::new(vec![])
            .failing_with(SessionError::Execution("boom".into()))
            .with_counters(counters.clone());
        let (runner, status) = runner(kernel);

        let err = runner.execute("x", ScriptHandlers::default()).await.unwrap_err();
        assert_eq!(err, SessionError::Execution("boom".into()));
        assert_eq!(counters.disconnects(), 1);
        assert_eq!(status.script_status(), ScriptStatus::Idle);
    }

    #[tokio::test]
    async fn test_cancel_running_script() {
        let counters = KernelCounters::default();
        let kernel = ScriptedKernel::new(vec![])
            .with_run_time(Duration::from_secs(30))
            .with_counters(counters.clone());
        let (runner, status) = runner(kernel);

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.execute("sleep", ScriptHandlers::default()).await })
        };

        let mut rx = status.subscribe();
        rx.wait_for(|s| s.script_status == ScriptStatus::Running)
            .await
            .unwrap();
        assert!(runner.cancel());

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(SessionError::Cancelled));
        assert_eq!(counters.disconnects(), 1);
        assert_eq!(status.script_status(), ScriptStatus::Idle);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_has_no_effect() {
        let counters = KernelCounters::default();
        let kernel = ScriptedKernel::new(vec![OutputItem::stdout("done\n")]).with_counters(counters.clone());
        let (runner, _) = runner(kernel);
        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();

        runner
            .execute(
                "x",
                ScriptHandlers::default().on_stdout(move |_| *counter.lock().unwrap() += 1),
            )
            .await
            .unwrap();

        assert!(!runner.cancel());
        assert!(!runner.cancel());
        assert_eq!(counters.disconnects(), 1);
        assert_eq!(*seen.lock().unwrap(), 1);

        // the next run starts with a fresh trigger
        runner.execute("y", ScriptHandlers::default()).await.unwrap();
        assert_eq!(counters.disconnects(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_kernel_still_resets_status() {
        let (runner, status) = runner(ScriptedKernel::new(vec![]).unreachable());
        let err = runner.execute("x", ScriptHandlers::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::Unreachable(_)));
        assert_eq!(status.script_status(), ScriptStatus::Idle);
    }
}
